//! Error types for MCP transport operations.
//!
//! Errors fall into two propagation classes:
//!
//! - **Operation-local**: a non-2xx POST, a failed POST, a malformed direct
//!   response. These resolve only the affected operation.
//! - **Channel-wide**: the legacy SSE subscription dying. These are surfaced
//!   through the failure signal, and the owner fails every pending operation.
//!
//! The transport layer never retries on its own; [`McpError::is_retryable`]
//! is a hint for the owning session.

use std::time::Duration;
use thiserror::Error;

/// The main error type for all MCP transport operations.
///
/// # Examples
///
/// ```rust
/// use mcp_http_transport::error::{McpError, TransportError};
///
/// let error = McpError::Transport(TransportError::UnexpectedStatus {
///     code: 503,
///     body: "overloaded".to_string(),
/// });
///
/// assert!(error.is_retryable());
/// ```
#[derive(Error, Debug, Clone)]
pub enum McpError {
    /// Transport-related errors (handshake, HTTP status, connection loss)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors (id reuse, server error responses)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An operation exceeded its time limit
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Configuration errors (invalid config files, missing parameters, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {reason}")]
    Serialization {
        /// What failed to (de)serialize
        reason: String,
    },

    /// Generic errors for cases not covered by specific variants
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

/// Transport-specific failures of the HTTP+SSE and Streamable HTTP channels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TransportError {
    /// The legacy SSE handshake did not produce a POST URL
    #[error("SSE handshake with {url} failed: {reason}")]
    Handshake { url: String, reason: String },

    /// A POST (or the SSE subscription request) returned a status outside 200..300
    #[error("Unexpected status code: {code}, body: {body}")]
    UnexpectedStatus { code: u16, body: String },

    /// The server rejected the credentials attached to the request
    #[error("Authentication required (status {code}): {challenge:?}")]
    Authentication {
        code: u16,
        challenge: Option<String>,
    },

    /// The server no longer recognizes the Streamable HTTP session
    #[error("MCP session {session_id} is no longer valid on the server")]
    SessionExpired { session_id: String },

    /// Connection-level failure: refused, reset, timed out or closed stream
    #[error("Transport failure ({transport_type}): {reason}")]
    TransportFailure {
        transport_type: String,
        reason: String,
    },

    /// A payload that could not be decoded as an MCP message
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Operation attempted before the transport was started
    #[error("Transport not connected ({transport_type}): {reason}")]
    NotConnected {
        transport_type: String,
        reason: String,
    },

    /// Operation attempted on, or interrupted by, a closed transport
    #[error("Transport closed ({transport_type})")]
    Closed { transport_type: String },

    /// A URL (configured or received) could not be parsed or resolved
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Protocol-level errors related to MCP message handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ProtocolError {
    /// An id was registered while a previous operation with the same id is
    /// still pending. This is a caller bug, not a runtime condition.
    #[error("Operation with id {id} is already pending")]
    DuplicateOperation { id: i64 },

    /// Server returned a JSON-RPC error response
    #[error("Server error {code}: {message}")]
    ServerError { code: i32, message: String },

    /// Invalid or malformed response
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// A message unfit for the requested operation, e.g. a request without id
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Operation attempted in the wrong session state
    #[error("Protocol state violation: {reason}")]
    StateViolation { reason: String },
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file has invalid format
    #[error("Invalid configuration format in {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    /// Required configuration parameter is missing
    #[error("Missing required configuration parameter: {parameter}")]
    MissingParameter { parameter: String },

    /// Configuration parameter has invalid value
    #[error("Invalid value for parameter '{parameter}': {value} - {reason}")]
    InvalidValue {
        parameter: String,
        value: String,
        reason: String,
    },
}

/// Convenience type alias for Results using McpError.
pub type McpResult<T> = Result<T, McpError>;

impl McpError {
    /// Create a new internal error with a custom message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mcp_http_transport::error::McpError;
    /// use std::time::Duration;
    ///
    /// let error = McpError::timeout("tools/list", Duration::from_secs(30));
    /// assert_eq!(error.category(), "timeout");
    /// ```
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Shorthand for a [`TransportError::TransportFailure`].
    pub fn transport_failure(transport_type: &str, reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::TransportFailure {
            transport_type: transport_type.to_string(),
            reason: reason.into(),
        })
    }

    /// Shorthand for a [`TransportError::Closed`].
    pub fn closed(transport_type: &str) -> Self {
        Self::Transport(TransportError::Closed {
            transport_type: transport_type.to_string(),
        })
    }

    /// Shorthand for a [`TransportError::MalformedMessage`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Transport(TransportError::MalformedMessage {
            reason: reason.into(),
        })
    }

    /// Check if this error is worth retrying at the session level.
    ///
    /// The transports never act on this themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            McpError::Transport(transport_err) => transport_err.is_retryable(),
            McpError::Timeout { .. } => true,
            McpError::Protocol(_) => false,
            McpError::Config(_) => false,
            McpError::Serialization { .. } => false,
            McpError::Internal { .. } => false,
        }
    }

    /// Get the error category for this error.
    pub fn category(&self) -> &'static str {
        match self {
            McpError::Transport(_) => "transport",
            McpError::Protocol(_) => "protocol",
            McpError::Timeout { .. } => "timeout",
            McpError::Config(_) => "config",
            McpError::Serialization { .. } => "serialization",
            McpError::Internal { .. } => "internal",
        }
    }
}

impl TransportError {
    /// Check if this transport error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Handshake { .. } => true,
            TransportError::TransportFailure { .. } => true,
            TransportError::SessionExpired { .. } => true,
            TransportError::UnexpectedStatus { code, .. } => {
                // 5xx errors are generally retryable, 4xx are not
                *code >= 500
            }
            TransportError::Authentication { .. } => false,
            TransportError::MalformedMessage { .. } => false,
            TransportError::NotConnected { .. } => false,
            TransportError::Closed { .. } => false,
            TransportError::InvalidUrl { .. } => false,
        }
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            McpError::Transport(TransportError::UnexpectedStatus {
                code: status.as_u16(),
                body: err.to_string(),
            })
        } else {
            McpError::transport_failure("http", err.to_string())
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::transport_failure("io", err.to_string())
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        McpError::Config(ConfigError::InvalidValue {
            parameter: "url".to_string(),
            value: err.to_string(),
            reason: "Invalid URL format".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = McpError::timeout("test operation", Duration::from_secs(30));
        assert_eq!(
            error.to_string(),
            "Operation timed out after 30000ms: test operation"
        );

        let status = McpError::Transport(TransportError::UnexpectedStatus {
            code: 500,
            body: "boom".to_string(),
        });
        assert_eq!(
            status.to_string(),
            "Transport error: Unexpected status code: 500, body: boom"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(McpError::timeout("test", Duration::from_secs(1)).is_retryable());
        assert!(McpError::transport_failure("sse", "reset").is_retryable());

        let duplicate = McpError::Protocol(ProtocolError::DuplicateOperation { id: 7 });
        assert!(!duplicate.is_retryable());

        let auth = McpError::Transport(TransportError::Authentication {
            code: 401,
            challenge: Some("Bearer".to_string()),
        });
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_status_retryable_only_for_server_errors() {
        let client_side = TransportError::UnexpectedStatus {
            code: 400,
            body: String::new(),
        };
        let server_side = TransportError::UnexpectedStatus {
            code: 502,
            body: String::new(),
        };
        assert!(!client_side.is_retryable());
        assert!(server_side.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(McpError::closed("sse").category(), "transport");
        assert_eq!(
            McpError::Protocol(ProtocolError::DuplicateOperation { id: 1 }).category(),
            "protocol"
        );
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(McpError::from(json_err).category(), "serialization");
    }
}
