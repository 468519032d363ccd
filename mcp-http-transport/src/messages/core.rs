//! Core JSON-RPC 2.0 message structures for MCP communication.
//!
//! Outgoing traffic is a single shape, [`ClientMessage`]: a request when it
//! carries an id, a notification when it does not. Incoming traffic stays
//! as raw [`serde_json::Value`] documents until [`IncomingMessage::classify`]
//! decides where they are routed.
//!
//! # Examples
//!
//! ```rust
//! use mcp_http_transport::messages::ClientMessage;
//! use serde_json::json;
//!
//! let request = ClientMessage::request(1, "tools/list", json!({}));
//! assert!(request.has_id());
//!
//! let notification =
//!     ClientMessage::notification("notifications/cancelled", json!({"requestId": 1}));
//! assert!(!notification.has_id());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Method name of the notification that completes the handshake.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Method name of the liveness check.
pub const PING_METHOD: &str = "ping";

/// A client-to-server JSON-RPC message.
///
/// A message with an id expects exactly one matching response. A message
/// without id is a fire-and-forget notification and never completes a
/// pending operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Identifier for request/response correlation, absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Method name being invoked
    pub method: String,

    /// Parameters for the method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ClientMessage {
    /// Create a request that expects a response.
    pub fn request(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Create a request without parameters.
    pub fn request_without_params(id: i64, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params: None,
        }
    }

    /// Create a notification; no response will ever be correlated to it.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    /// The `notifications/initialized` message sent after the handshake response.
    pub fn initialized() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: INITIALIZED_NOTIFICATION.to_string(),
            params: None,
        }
    }

    /// Whether this message expects a response.
    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    /// Whether this is the `initialize` handshake request.
    pub fn is_initialize(&self) -> bool {
        self.method == INITIALIZE_METHOD
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for JsonRpcError {}

/// Routing decision for a server-to-client JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Reply to a client request; resolves the pending operation with this id
    Response {
        /// Correlation id
        id: i64,
    },
    /// Server notification (method, no id)
    Notification,
    /// Server-initiated request (method and id), e.g. a server ping
    ServerRequest {
        /// Server-chosen id, unrelated to the client's id space
        id: i64,
    },
    /// Anything else: non-numeric ids, missing method and id, non-objects
    Unroutable,
}

impl IncomingMessage {
    /// Classify an incoming JSON document.
    ///
    /// Numeric ids and numeric strings (`"7"`) are both accepted since some
    /// servers echo ids back as strings.
    pub fn classify(message: &Value) -> Self {
        let Some(object) = message.as_object() else {
            return Self::Unroutable;
        };
        let id = object.get("id").and_then(numeric_id);
        let has_method = object.get("method").is_some_and(Value::is_string);

        match (id, has_method) {
            (Some(id), false) => Self::Response { id },
            (Some(id), true) => Self::ServerRequest { id },
            (None, true) => Self::Notification,
            (None, false) => Self::Unroutable,
        }
    }
}

fn numeric_id(id: &Value) -> Option<i64> {
    match id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extract the JSON-RPC `error` object of a response, if any.
pub fn response_error(response: &Value) -> Option<JsonRpcError> {
    response
        .get("error")
        .and_then(|error| serde_json::from_value(error.clone()).ok())
}
