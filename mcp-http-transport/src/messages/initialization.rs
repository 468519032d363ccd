//! MCP initialization message types.
//!
//! The handshake is:
//! 1. Client sends `initialize` request with capabilities and client info
//! 2. Server responds with its capabilities and server info
//! 3. Client sends `notifications/initialized`, strictly after step 2
//!
//! # Examples
//!
//! ```rust
//! use mcp_http_transport::messages::{InitializeRequest, Implementation};
//!
//! let message = InitializeRequest::basic("my-client", "1.0.0").into_message(0).unwrap();
//! assert_eq!(message.method, "initialize");
//! ```

use super::{ClientCapabilities, ClientMessage, Implementation, ProtocolVersion, INITIALIZE_METHOD};
use crate::error::McpResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-to-server initialization request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Protocol version requested by the client
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,

    /// Capabilities offered by the client
    pub capabilities: ClientCapabilities,

    /// Information about the client implementation
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

impl InitializeRequest {
    /// Create a new initialization request.
    pub fn new(
        protocol_version: ProtocolVersion,
        capabilities: ClientCapabilities,
        client_info: Implementation,
    ) -> Self {
        Self {
            protocol_version,
            capabilities,
            client_info,
        }
    }

    /// Create a basic initialization request with default capabilities.
    pub fn basic(client_name: impl Into<String>, client_version: impl Into<String>) -> Self {
        Self::new(
            ProtocolVersion::default(),
            ClientCapabilities::default(),
            Implementation::new(client_name, client_version),
        )
    }

    /// Wrap the parameters in an `initialize` request with the given id.
    pub fn into_message(self, id: i64) -> McpResult<ClientMessage> {
        Ok(ClientMessage::request(
            id,
            INITIALIZE_METHOD,
            serde_json::to_value(self)?,
        ))
    }
}

/// Server-to-client initialization result (the `result` member of the response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version that will be used for the session
    #[serde(rename = "protocolVersion")]
    pub protocol_version: ProtocolVersion,

    /// Capabilities offered by the server, kept opaque
    #[serde(default)]
    pub capabilities: Value,

    /// Information about the server implementation
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,

    /// Optional instructions for the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_message_shape() {
        let message = InitializeRequest::basic("test-client", "0.1.0")
            .into_message(0)
            .unwrap();

        assert_eq!(message.id, Some(0));
        assert!(message.is_initialize());
        let params = message.params.unwrap();
        assert_eq!(params["protocolVersion"], "2025-03-26");
        assert_eq!(params["clientInfo"]["name"], "test-client");
    }

    #[test]
    fn test_initialize_result_parsing() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": true}},
            "serverInfo": {"name": "server", "version": "2.0"}
        }))
        .unwrap();

        assert_eq!(result.protocol_version, ProtocolVersion::V2024_11_05);
        assert_eq!(result.server_info.name, "server");
        assert!(result.instructions.is_none());
    }
}
