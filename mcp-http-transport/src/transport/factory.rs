//! Transport factory for creating transport instances.

use std::sync::Arc;

use reqwest::Client;

use super::{AuthProvider, HeadersSupplier, McpTransport, RequestDecorator, TransportConfig};
use crate::error::McpResult;

#[cfg(feature = "http-sse")]
use super::sse::HttpSseTransport;

#[cfg(feature = "streamable-http")]
use super::streamable_http::StreamableHttpTransport;

/// Factory for creating transport instances.
///
/// # Examples
///
/// ```rust
/// use mcp_http_transport::transport::{TransportConfig, TransportFactory};
///
/// let config = TransportConfig::sse("http://localhost:3000/sse").unwrap();
/// let transport = TransportFactory::create(config).unwrap();
/// assert_eq!(transport.transport_type(), "sse");
/// ```
pub struct TransportFactory;

impl TransportFactory {
    /// Create a transport instance from configuration.
    ///
    /// Static headers and auth from the configuration are attached.
    ///
    /// # Errors
    ///
    /// * `ConfigError` - If the configuration is invalid or the transport
    ///   type is not compiled in
    pub fn create(config: TransportConfig) -> McpResult<Arc<dyn McpTransport>> {
        Self::create_with_hooks(config, None, None)
    }

    /// Create a transport whose credentials come from `auth` instead of the
    /// configuration.
    pub fn create_with_auth(
        config: TransportConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> McpResult<Arc<dyn McpTransport>> {
        Self::create_with_hooks(config, Some(auth), None)
    }

    /// Create a transport with explicit auth and per-message header hooks.
    ///
    /// Hooks given here replace the ones derived from the configuration.
    pub fn create_with_hooks(
        config: TransportConfig,
        auth: Option<Arc<dyn AuthProvider>>,
        headers: Option<Arc<dyn HeadersSupplier>>,
    ) -> McpResult<Arc<dyn McpTransport>> {
        Self::build(config, None, auth, headers)
    }

    /// Create a transport that sends through `client`.
    ///
    /// Use this to share a connection pool or to supply TLS and proxy
    /// settings. Headers and auth still come from the configuration.
    pub fn create_with_client(
        config: TransportConfig,
        client: Client,
    ) -> McpResult<Arc<dyn McpTransport>> {
        Self::build(config, Some(client), None, None)
    }

    #[allow(unused_variables)]
    fn build(
        config: TransportConfig,
        client: Option<Client>,
        auth: Option<Arc<dyn AuthProvider>>,
        headers: Option<Arc<dyn HeadersSupplier>>,
    ) -> McpResult<Arc<dyn McpTransport>> {
        // Validate configuration before attempting to create transport
        config.validate()?;

        match config {
            #[cfg(feature = "http-sse")]
            TransportConfig::Sse(sse_config) => {
                let base =
                    RequestDecorator::from_config(&sse_config.headers, sse_config.auth.as_ref())?;
                let decorator = decorator(base, auth, headers);
                let transport = match client {
                    Some(client) => HttpSseTransport::with_client(sse_config, client, decorator)?,
                    None => HttpSseTransport::with_decorator(sse_config, decorator)?,
                };
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "http-sse"))]
            TransportConfig::Sse(_) => Err(not_compiled_in("sse", "http-sse")),

            #[cfg(feature = "streamable-http")]
            TransportConfig::StreamableHttp(http_config) => {
                let base =
                    RequestDecorator::from_config(&http_config.headers, http_config.auth.as_ref())?;
                let decorator = decorator(base, auth, headers);
                let transport = match client {
                    Some(client) => {
                        StreamableHttpTransport::with_client(http_config, client, decorator)?
                    }
                    None => StreamableHttpTransport::with_decorator(http_config, decorator)?,
                };
                Ok(Arc::new(transport))
            }

            #[cfg(not(feature = "streamable-http"))]
            TransportConfig::StreamableHttp(_) => {
                Err(not_compiled_in("streamable-http", "streamable-http"))
            }
        }
    }

    /// Get a list of supported transport types for this build.
    pub fn supported_transports() -> Vec<&'static str> {
        vec![
            #[cfg(feature = "http-sse")]
            "sse",
            #[cfg(feature = "streamable-http")]
            "streamable-http",
        ]
    }

    /// Check if a transport type is supported in this build.
    pub fn is_supported(transport_type: &str) -> bool {
        Self::supported_transports().contains(&transport_type)
    }
}

#[allow(dead_code)]
fn decorator(
    base: RequestDecorator,
    auth: Option<Arc<dyn AuthProvider>>,
    headers: Option<Arc<dyn HeadersSupplier>>,
) -> RequestDecorator {
    let base = match auth {
        Some(auth) => base.with_auth(auth),
        None => base,
    };
    match headers {
        Some(headers) => base.with_headers(headers),
        None => base,
    }
}

#[allow(dead_code)]
fn not_compiled_in(transport_type: &str, feature: &str) -> crate::error::McpError {
    crate::error::ConfigError::InvalidValue {
        parameter: "transport_type".to_string(),
        value: transport_type.to_string(),
        reason: format!(
            "{} transport support not compiled in (enable '{}' feature)",
            transport_type, feature
        ),
    }
    .into()
}
