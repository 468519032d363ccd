//! MCP message types used by the HTTP transports.
//!
//! - `core`: the outgoing [`ClientMessage`] shape and incoming message classification
//! - `initialization`: the `initialize` / `notifications/initialized` handshake pair

pub mod core;
pub mod initialization;

pub use self::core::*;
pub use self::initialization::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// MCP protocol version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// HTTP+SSE era protocol
    #[serde(rename = "2024-11-05")]
    V2024_11_05,

    /// First Streamable HTTP protocol
    #[serde(rename = "2025-03-26")]
    V2025_03_26,

    /// Streamable HTTP with structured tool output
    #[serde(rename = "2025-06-18")]
    V2025_06_18,

    /// Custom version string for forward compatibility
    #[serde(untagged)]
    Custom(String),
}

impl ProtocolVersion {
    /// Get the string representation of the protocol version.
    pub fn as_str(&self) -> &str {
        match self {
            Self::V2024_11_05 => "2024-11-05",
            Self::V2025_03_26 => "2025-03-26",
            Self::V2025_06_18 => "2025-06-18",
            Self::Custom(version) => version,
        }
    }

    /// Check if this version is supported by the current implementation.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2025_03_26
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capabilities the client declares during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientCapabilities {
    /// Client can provide root directories
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,

    /// Client can handle sampling requests from the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,

    /// Custom or experimental capabilities
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

/// Implementation information for client or server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation
    pub name: String,

    /// Version of the implementation
    pub version: String,

    /// Additional implementation metadata
    #[serde(flatten)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Implementation {
    /// Create a new implementation info structure.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata: HashMap::new(),
        }
    }
}
