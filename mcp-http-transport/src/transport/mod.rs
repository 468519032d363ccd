//! MCP client transports over HTTP.
//!
//! Two independent implementations of [`McpTransport`] are provided:
//! - **Legacy HTTP+SSE** ([`sse::HttpSseTransport`]): a long-lived GET
//!   subscription delivers every server message; client messages are POSTed
//!   to the URL announced by the server's `endpoint` event.
//! - **Streamable HTTP** ([`streamable_http::StreamableHttpTransport`]): one
//!   POST per operation, answered by a JSON body or an inline event stream.
//!
//! Both are selected through [`TransportConfig`] and built by
//! [`TransportFactory`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use mcp_http_transport::correlator::OperationCorrelator;
//! use mcp_http_transport::messages::{ClientMessage, InitializeRequest};
//! use mcp_http_transport::transport::{TransportConfig, TransportFactory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransportConfig::streamable_http("http://localhost:8080/mcp")?;
//!     let transport = TransportFactory::create(config)?;
//!
//!     transport.start(Arc::new(OperationCorrelator::new(None))).await?;
//!     transport
//!         .initialize(InitializeRequest::basic("test-client", "0.1.0").into_message(0)?)
//!         .await?;
//!
//!     let tools = transport
//!         .execute_with_response(ClientMessage::request_without_params(1, "tools/list"))
//!         .await?;
//!     println!("{tools}");
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod factory;

#[cfg(feature = "http-sse")]
pub mod sse;

#[cfg(feature = "streamable-http")]
pub mod streamable_http;

pub use auth::*;
pub use config::*;
pub use factory::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::correlator::OperationCorrelator;
use crate::error::{McpError, McpResult, ProtocolError, TransportError};
use crate::messages::ClientMessage;

/// Callback invoked when a transport's channel dies on its own.
pub type FailureCallback = Box<dyn FnOnce(McpError) + Send>;

/// Capability set shared by the HTTP transports.
///
/// Methods take `&self` so that one transport can carry any number of
/// concurrent operations. Transports never retry on their own.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Short name used in logs and errors.
    fn transport_type(&self) -> &'static str;

    /// Open the transport. Incoming responses are routed to `correlator`.
    async fn start(&self, correlator: Arc<OperationCorrelator>) -> McpResult<()>;

    /// Send `initialize`, await its response, then send
    /// `notifications/initialized`.
    ///
    /// The notification is only sent after the response arrived; the
    /// response is returned to the caller unchanged.
    async fn initialize(&self, request: ClientMessage) -> McpResult<Value> {
        let response = self.execute_with_response(request).await?;
        self.execute_without_response(ClientMessage::initialized())
            .await?;
        debug!("{} transport initialized", self.transport_type());
        Ok(response)
    }

    /// Send a request and wait for the correlated response document.
    async fn execute_with_response(&self, message: ClientMessage) -> McpResult<Value>;

    /// Send a message without waiting for any response.
    async fn execute_without_response(&self, message: ClientMessage) -> McpResult<()>;

    /// Register the callback fired when the channel terminates unsolicited.
    fn on_failure(&self, callback: FailureCallback);

    /// Close the transport. Idempotent; never fires the failure callback.
    async fn close(&self) -> McpResult<()>;

    /// Snapshot of counters and connection state.
    fn info(&self) -> TransportInfo;
}

#[derive(Default)]
struct SignalState {
    closed: bool,
    failure: Option<McpError>,
    callback: Option<FailureCallback>,
    delivered: bool,
}

/// At-most-once notification of unsolicited channel termination.
///
/// A deliberate close is recorded with [`FailureSignal::mark_closed`] before
/// any teardown; from then on the signal can no longer fire.
#[derive(Default)]
pub struct FailureSignal {
    state: Mutex<SignalState>,
}

impl FailureSignal {
    /// Create an unarmed signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the callback, replacing any earlier one that has not fired.
    ///
    /// A failure recorded before registration is delivered immediately.
    pub fn register(&self, callback: FailureCallback) {
        let mut state = self.lock();
        if state.delivered || state.closed {
            return;
        }
        match state.failure.clone() {
            Some(error) => {
                state.delivered = true;
                drop(state);
                callback(error);
            }
            None => state.callback = Some(callback),
        }
    }

    /// Fire the signal. Returns `true` only for the first firing on an
    /// open transport.
    pub fn fire(&self, error: McpError) -> bool {
        let mut state = self.lock();
        if state.closed || state.failure.is_some() {
            return false;
        }
        warn!("Transport channel terminated: {}", error);
        state.failure = Some(error.clone());

        if let Some(callback) = state.callback.take() {
            state.delivered = true;
            drop(state);
            callback(error);
        }
        true
    }

    /// Record a deliberate close. Returns `true` on the first call.
    pub fn mark_closed(&self) -> bool {
        let mut state = self.lock();
        let first = !state.closed;
        state.closed = true;
        state.callback = None;
        first
    }

    /// Whether [`FailureSignal::mark_closed`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether the signal has fired.
    pub fn has_fired(&self) -> bool {
        self.lock().failure.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FailureSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FailureSignal")
            .field("closed", &state.closed)
            .field("fired", &state.failure.is_some())
            .finish()
    }
}

/// Transport information and statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransportInfo {
    /// Type of transport (sse, streamable-http)
    pub transport_type: String,

    /// Whether the transport is currently usable
    pub connected: bool,

    /// Endpoint messages are sent to, once known
    pub endpoint: Option<String>,

    /// Session id issued by the server, if any
    pub session_id: Option<String>,

    /// Number of requests sent
    pub requests_sent: u64,

    /// Number of responses received
    pub responses_received: u64,

    /// Number of notifications sent
    pub notifications_sent: u64,

    /// Number of errors encountered
    pub errors: u64,
}

/// Lock-free counters backing [`TransportInfo`].
#[derive(Debug, Default)]
pub struct TransportCounters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    notifications_sent: AtomicU64,
    errors: AtomicU64,
}

impl TransportCounters {
    /// Count one outgoing message, request or notification by its id.
    pub fn record_sent(&self, message: &ClientMessage) {
        let counter = if message.has_id() {
            &self.requests_sent
        } else {
            &self.notifications_sent
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one correlated response.
    pub fn record_response(&self) {
        self.responses_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed operation.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Build an info snapshot.
    pub fn snapshot(
        &self,
        transport_type: &str,
        connected: bool,
        endpoint: Option<String>,
        session_id: Option<String>,
    ) -> TransportInfo {
        TransportInfo {
            transport_type: transport_type.to_string(),
            connected,
            endpoint,
            session_id,
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_received: self.responses_received.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Map a non-2xx response to an operation error.
///
/// 401 becomes [`TransportError::Authentication`] carrying the
/// `WWW-Authenticate` challenge; everything else keeps its status and body.
pub(crate) async fn status_error(response: reqwest::Response) -> McpError {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        return TransportError::Authentication {
            code: status.as_u16(),
            challenge,
        }
        .into();
    }

    let body = response.text().await.unwrap_or_default();
    TransportError::UnexpectedStatus {
        code: status.as_u16(),
        body,
    }
    .into()
}

/// The id of a message that must be answered.
pub(crate) fn require_id(message: &ClientMessage) -> McpResult<i64> {
    message.id.ok_or_else(|| {
        ProtocolError::InvalidRequest {
            reason: format!("'{}' has no id and cannot expect a response", message.method),
        }
        .into()
    })
}
