//! # MCP HTTP Transport
//!
//! `mcp-http-transport` is the client side of the two HTTP transports of the
//! Model Context Protocol (MCP):
//!
//! - **Legacy HTTP+SSE**: a long-lived event stream carries every server
//!   message; client messages are POSTed to an endpoint the server announces
//! - **Streamable HTTP**: one POST per operation, answered with JSON or an
//!   inline event stream, bound together by an `Mcp-Session-Id`
//!
//! The crate handles message delivery, response correlation, session ids and
//! channel failure. Protocol semantics above `initialize` belong to the caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcp_http_transport::{Implementation, McpSession, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::streamable_http("http://localhost:8080/mcp")?;
//!     let session = McpSession::from_config(config, None)?;
//!
//!     let server = session.connect(Implementation::new("mcp-client", "0.1.0")).await?;
//!     println!("Connected to: {}", server.server_info.name);
//!
//!     let latency = session.ping().await?;
//!     println!("ping: {:?}", latency);
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`messages`]: outgoing message shapes and incoming classification
//! - [`sse`]: the `text/event-stream` frame decoder
//! - [`correlator`]: id-keyed table of operations awaiting a response
//! - [`transport`]: the [`McpTransport`] trait, both transports, config and auth hooks
//! - [`session`]: id generation, handshake and failure handling on top of a transport
//! - [`error`]: error types shared by all of the above
//!
//! ## Transport Support
//!
//! - **http-sse**: legacy HTTP+SSE (enabled by default)
//! - **streamable-http**: Streamable HTTP (enabled by default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod correlator;
pub mod error;
pub mod messages;
pub mod session;
pub mod sse;
pub mod transport;

// Re-export commonly used types for convenience
pub use correlator::{MessageHandler, OperationCorrelator, PendingOperation};
pub use error::{McpError, McpResult};
pub use messages::{
    ClientMessage, Implementation, InitializeRequest, InitializeResult, ProtocolVersion,
};
pub use session::{McpSession, SessionStatus};
pub use transport::{FailureSignal, McpTransport, TransportConfig, TransportFactory, TransportInfo};

/// Current version of the mcp-http-transport library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
