//! MCP client session on top of a transport.
//!
//! [`McpSession`] owns the pieces a transport deliberately leaves to its
//! owner:
//! - generating strictly increasing request ids
//! - the `initialize` handshake and the resulting server information
//! - unwrapping JSON-RPC `result` / `error` members
//! - reacting to channel death by failing everything still pending
//!
//! A failed session stays failed; build a new one to reconnect.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::correlator::{MessageHandler, OperationCorrelator};
use crate::error::{McpError, McpResult, ProtocolError, TransportError};
use crate::messages::{
    response_error, ClientCapabilities, ClientMessage, Implementation, InitializeRequest,
    InitializeResult, ProtocolVersion, PING_METHOD,
};
use crate::transport::{McpTransport, TransportConfig, TransportFactory, TransportInfo};

/// Lifecycle of an [`McpSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, not connected
    Disconnected,
    /// Transport starting or handshake in progress
    Connecting,
    /// Initialized and usable
    Ready,
    /// The transport failed; the reason is kept for diagnostics
    Failed(String),
    /// Closed by the owner
    Closed,
}

/// An MCP client session.
///
/// # Examples
///
/// ```rust,no_run
/// use mcp_http_transport::messages::Implementation;
/// use mcp_http_transport::session::McpSession;
/// use mcp_http_transport::transport::TransportConfig;
///
/// # async fn example() -> mcp_http_transport::McpResult<()> {
/// let config = TransportConfig::sse("http://localhost:3000/sse")?;
/// let session = McpSession::from_config(config, None)?;
///
/// let server = session.connect(Implementation::new("test-client", "0.1.0")).await?;
/// println!("Connected to {}", server.server_info.name);
///
/// let tools = session.request("tools/list", None).await?;
/// println!("{tools}");
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct McpSession {
    transport: Arc<dyn McpTransport>,
    correlator: Arc<OperationCorrelator>,
    next_id: AtomicI64,
    status: Arc<watch::Sender<SessionStatus>>,
    server: Mutex<Option<InitializeResult>>,
}

impl McpSession {
    /// Wrap a transport. Server notifications and requests go to `handler`.
    pub fn new(
        transport: Arc<dyn McpTransport>,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        Self {
            transport,
            correlator: Arc::new(OperationCorrelator::new(handler)),
            next_id: AtomicI64::new(0),
            status: Arc::new(status),
            server: Mutex::new(None),
        }
    }

    /// Build the transport described by `config` and wrap it.
    pub fn from_config(
        config: TransportConfig,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> McpResult<Self> {
        Ok(Self::new(TransportFactory::create(config)?, handler))
    }

    /// Start the transport and perform the handshake with default capabilities.
    pub async fn connect(&self, client_info: Implementation) -> McpResult<InitializeResult> {
        let request = InitializeRequest::new(
            ProtocolVersion::default(),
            ClientCapabilities::default(),
            client_info,
        );
        self.connect_with(request).await
    }

    /// Start the transport and perform the handshake with `request`.
    pub async fn connect_with(&self, request: InitializeRequest) -> McpResult<InitializeResult> {
        let mut started = false;
        self.status.send_if_modified(|status| {
            if *status != SessionStatus::Disconnected {
                return false;
            }
            *status = SessionStatus::Connecting;
            started = true;
            true
        });
        if !started {
            return Err(ProtocolError::StateViolation {
                reason: format!("cannot connect a session that is {:?}", self.status()),
            }
            .into());
        }

        self.watch_failures();

        match self.handshake(request).await {
            Ok(result) => {
                info!(
                    "Connected to {} {} over {} (protocol {})",
                    result.server_info.name,
                    result.server_info.version,
                    self.transport.transport_type(),
                    result.protocol_version
                );
                *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
                self.status.send_if_modified(|status| {
                    if *status != SessionStatus::Connecting {
                        return false;
                    }
                    *status = SessionStatus::Ready;
                    true
                });
                self.ensure_ready()?;
                Ok(result)
            }
            Err(e) => {
                self.status.send_if_modified(|status| {
                    if matches!(status, SessionStatus::Closed | SessionStatus::Failed(_)) {
                        return false;
                    }
                    *status = SessionStatus::Failed(e.to_string());
                    true
                });
                // release the subscription a failed handshake may leave open
                if let Err(close_error) = self.transport.close().await {
                    warn!(
                        "Failed to close {} transport after handshake error: {}",
                        self.transport.transport_type(),
                        close_error
                    );
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self, request: InitializeRequest) -> McpResult<InitializeResult> {
        self.transport.start(Arc::clone(&self.correlator)).await?;

        let message = request.into_message(self.next_id())?;
        let response = self.transport.initialize(message).await?;
        let result = extract_result(response)?;

        serde_json::from_value(result).map_err(|e| {
            ProtocolError::InvalidResponse {
                reason: format!("invalid initialize result: {}", e),
            }
            .into()
        })
    }

    /// Fail every pending operation and mark the session failed when the
    /// transport's channel dies.
    fn watch_failures(&self) {
        let correlator = Arc::clone(&self.correlator);
        let status = Arc::clone(&self.status);
        let transport_type = self.transport.transport_type();

        self.transport.on_failure(Box::new(move |error| {
            warn!("{} transport failed: {}", transport_type, error);
            let failure = match error {
                McpError::Transport(TransportError::TransportFailure { .. }) => error,
                other => McpError::transport_failure(transport_type, other.to_string()),
            };
            status.send_if_modified(|status| {
                if *status == SessionStatus::Closed {
                    return false;
                }
                *status = SessionStatus::Failed(failure.to_string());
                true
            });
            correlator.fail_all(failure);
        }));
    }

    /// Send a request and return its `result` member.
    ///
    /// A JSON-RPC `error` member becomes [`ProtocolError::ServerError`].
    pub async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        self.ensure_ready()?;
        let id = self.next_id();
        let message = match params {
            Some(params) => ClientMessage::request(id, method, params),
            None => ClientMessage::request_without_params(id, method),
        };

        debug!("Sending request {} ({})", id, method);
        let response = self.transport.execute_with_response(message).await?;
        extract_result(response)
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Value) -> McpResult<()> {
        self.ensure_ready()?;
        self.transport
            .execute_without_response(ClientMessage::notification(method, params))
            .await
    }

    /// Round-trip a `ping` request and report how long it took.
    pub async fn ping(&self) -> McpResult<Duration> {
        let started = Instant::now();
        self.request(PING_METHOD, None).await?;
        Ok(started.elapsed())
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes, e.g. to rebuild the session after a failure.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Whether the transport failed underneath this session.
    pub fn is_failed(&self) -> bool {
        matches!(*self.status.borrow(), SessionStatus::Failed(_))
    }

    /// Server information from the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Transport counters and connection details.
    pub fn transport_info(&self) -> TransportInfo {
        self.transport.info()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Close the transport. Pending requests fail with a closed error.
    pub async fn close(&self) -> McpResult<()> {
        self.status.send_replace(SessionStatus::Closed);
        self.transport.close().await
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_ready(&self) -> McpResult<()> {
        match &*self.status.borrow() {
            SessionStatus::Ready => Ok(()),
            SessionStatus::Failed(reason) => Err(McpError::transport_failure(
                self.transport.transport_type(),
                reason.clone(),
            )),
            SessionStatus::Closed => Err(McpError::closed(self.transport.transport_type())),
            other => Err(ProtocolError::StateViolation {
                reason: format!("session is {:?}, not ready", other),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("transport", &self.transport.transport_type())
            .field("status", &self.status())
            .field("pending", &self.correlator.pending_count())
            .finish()
    }
}

/// The `result` member of a response, or its JSON-RPC error.
pub fn extract_result(response: Value) -> McpResult<Value> {
    if let Some(error) = response_error(&response) {
        return Err(ProtocolError::ServerError {
            code: error.code,
            message: error.message,
        }
        .into());
    }

    match response {
        Value::Object(mut object) => object.remove("result").ok_or_else(|| {
            ProtocolError::InvalidResponse {
                reason: "response has neither result nor error".to_string(),
            }
            .into()
        }),
        other => Err(ProtocolError::InvalidResponse {
            reason: format!("response is not an object: {}", other),
        }
        .into()),
    }
}
