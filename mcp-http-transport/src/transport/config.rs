//! Transport configuration.
//!
//! Configurations can be built programmatically or loaded from JSON, YAML or
//! TOML files. Timeouts use humantime notation (`"30s"`, `"2m"`).
//!
//! # Examples
//!
//! ```rust
//! use mcp_http_transport::transport::{AuthConfig, SseConfig, TransportConfig};
//! use std::time::Duration;
//!
//! let config = TransportConfig::Sse(
//!     SseConfig::new("https://api.example.com/sse".parse().unwrap())
//!         .timeout(Duration::from_secs(10))
//!         .header("X-Client", "test-client")
//!         .auth(AuthConfig::bearer("secret")),
//! );
//! assert!(config.validate().is_ok());
//! ```
//!
//! The same configuration as YAML:
//!
//! ```yaml
//! type: sse
//! url: https://api.example.com/sse
//! timeout: 10s
//! headers:
//!   X-Client: test-client
//! auth:
//!   type: bearer
//!   token: secret
//! ```

use crate::error::{ConfigError, McpResult};
use crate::sse::DEFAULT_MAX_EVENT_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default time limit for handshakes and individual operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_max_event_size() -> usize {
    DEFAULT_MAX_EVENT_SIZE
}

/// Transport selection and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Legacy HTTP+SSE (protocol 2024-11-05)
    Sse(SseConfig),

    /// Streamable HTTP (protocol 2025-03-26 and later)
    StreamableHttp(StreamableHttpConfig),
}

impl TransportConfig {
    /// Create a legacy HTTP+SSE configuration for the given SSE URL.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mcp_http_transport::transport::TransportConfig;
    ///
    /// let config = TransportConfig::sse("https://api.example.com/sse").unwrap();
    /// assert_eq!(config.transport_type(), "sse");
    /// ```
    pub fn sse(url: impl AsRef<str>) -> McpResult<Self> {
        Ok(Self::Sse(SseConfig::new(parse_url(url.as_ref())?)))
    }

    /// Create a Streamable HTTP configuration for the given endpoint.
    pub fn streamable_http(url: impl AsRef<str>) -> McpResult<Self> {
        Ok(Self::StreamableHttp(StreamableHttpConfig::new(parse_url(
            url.as_ref(),
        )?)))
    }

    /// Get a human-readable name for this transport type.
    pub fn transport_type(&self) -> &'static str {
        match self {
            Self::Sse(_) => "sse",
            Self::StreamableHttp(_) => "streamable-http",
        }
    }

    /// The configured endpoint.
    pub fn url(&self) -> &Url {
        match self {
            Self::Sse(config) => &config.url,
            Self::StreamableHttp(config) => &config.url,
        }
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Sse(config) => config.timeout,
            Self::StreamableHttp(config) => config.timeout,
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> McpResult<()> {
        match self {
            Self::Sse(config) => config.validate(),
            Self::StreamableHttp(config) => config.validate(),
        }
    }

    /// Load configuration from a file.
    ///
    /// Supports JSON, YAML, and TOML formats based on file extension.
    pub fn from_file(path: impl AsRef<Path>) -> McpResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_e| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let invalid = |reason: String| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason,
        };

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            _ => return Err(invalid(unsupported_format()).into()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file, picking the format from the extension.
    pub fn to_file(&self, path: impl AsRef<Path>) -> McpResult<()> {
        let path = path.as_ref();
        let invalid = |reason: String| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason,
        };

        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::to_string_pretty(self).map_err(|e| invalid(e.to_string()))?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::to_string(self).map_err(|e| invalid(e.to_string()))?
            }
            Some("toml") => toml::to_string(self).map_err(|e| invalid(e.to_string()))?,
            _ => return Err(invalid(unsupported_format()).into()),
        };

        std::fs::write(path, content).map_err(|e| invalid(e.to_string()))?;

        Ok(())
    }
}

/// Configuration for the legacy HTTP+SSE transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseConfig {
    /// URL of the SSE subscription
    pub url: Url,

    /// Bound for the endpoint handshake and for each operation
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Log outgoing bodies at info level
    #[serde(default)]
    pub log_requests: bool,

    /// Log incoming bodies at info level
    #[serde(default)]
    pub log_responses: bool,

    /// Largest accepted SSE record in bytes
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,

    /// Additional HTTP headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Authentication configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl SseConfig {
    /// Create a new HTTP+SSE configuration.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            log_requests: false,
            log_responses: false,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
            headers: HashMap::new(),
            auth: None,
        }
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set authentication configuration.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Enable request and response body logging.
    pub fn log_traffic(mut self, requests: bool, responses: bool) -> Self {
        self.log_requests = requests;
        self.log_responses = responses;
        self
    }

    /// Set the largest accepted SSE record.
    pub fn max_event_size(mut self, bytes: usize) -> Self {
        self.max_event_size = bytes;
        self
    }

    /// Validate the HTTP+SSE configuration.
    pub fn validate(&self) -> McpResult<()> {
        validate_http_url("url", &self.url)?;
        validate_timeout(self.timeout)?;

        if self.max_event_size == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "max_event_size".to_string(),
                value: "0".to_string(),
                reason: "Maximum event size must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(ref auth) = self.auth {
            auth.validate()?;
        }

        Ok(())
    }
}

/// Configuration for the Streamable HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamableHttpConfig {
    /// The single MCP endpoint
    pub url: Url,

    /// Bound for each operation
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Log outgoing bodies at info level
    #[serde(default)]
    pub log_requests: bool,

    /// Log incoming bodies at info level
    #[serde(default)]
    pub log_responses: bool,

    /// Additional HTTP headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Authentication configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl StreamableHttpConfig {
    /// Create a new Streamable HTTP configuration.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_TIMEOUT,
            log_requests: false,
            log_responses: false,
            headers: HashMap::new(),
            auth: None,
        }
    }

    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set authentication configuration.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Enable request and response body logging.
    pub fn log_traffic(mut self, requests: bool, responses: bool) -> Self {
        self.log_requests = requests;
        self.log_responses = responses;
        self
    }

    /// Validate the Streamable HTTP configuration.
    pub fn validate(&self) -> McpResult<()> {
        validate_http_url("url", &self.url)?;
        validate_timeout(self.timeout)?;

        if let Some(ref auth) = self.auth {
            auth.validate()?;
        }

        Ok(())
    }
}

/// Authentication configuration for HTTP-based transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum AuthConfig {
    /// Bearer token authentication
    Bearer { token: String },

    /// Custom header-based authentication
    Header { name: String, value: String },
}

impl AuthConfig {
    /// Create a new bearer token authentication configuration.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Create a new custom header authentication configuration.
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Validate the authentication configuration.
    pub fn validate(&self) -> McpResult<()> {
        match self {
            Self::Bearer { token } => {
                if token.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        parameter: "auth".to_string(),
                        value: "bearer".to_string(),
                        reason: "Token cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            Self::Header { name, value } => {
                if name.is_empty() || value.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        parameter: "auth".to_string(),
                        value: "header".to_string(),
                        reason: "Header name and value cannot be empty".to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn parse_url(url: &str) -> McpResult<Url> {
    url.parse().map_err(|e| {
        ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: url.to_string(),
            reason: format!("Invalid URL: {}", e),
        }
        .into()
    })
}

fn validate_http_url(parameter: &str, url: &Url) -> McpResult<()> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidValue {
            parameter: parameter.to_string(),
            value: url.to_string(),
            reason: "URL must use http or https scheme".to_string(),
        }
        .into());
    }
    Ok(())
}

fn validate_timeout(timeout: Duration) -> McpResult<()> {
    if timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
            parameter: "timeout".to_string(),
            value: "0s".to_string(),
            reason: "Timeout must be greater than zero".to_string(),
        }
        .into());
    }
    Ok(())
}

fn unsupported_format() -> String {
    "Unsupported file format. Use .json, .yaml, or .toml".to_string()
}
