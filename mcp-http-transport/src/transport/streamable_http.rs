//! Streamable HTTP transport (protocol 2025-03-26 and later).
//!
//! Every operation is one POST to the MCP endpoint. The server answers a
//! request either with a JSON body or with an inline `text/event-stream`
//! whose `message` events carry the response (and possibly notifications).
//!
//! Session handling:
//! - The first response carrying `Mcp-Session-Id` establishes the session
//! - Every later request repeats it, except `initialize` which negotiates a
//!   fresh one
//! - A 404 while a session is held means the server dropped it; only that
//!   operation fails, with [`TransportError::SessionExpired`]. The stored id
//!   stays until the next `initialize` reply replaces it

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    require_id, status_error, FailureCallback, FailureSignal, McpTransport, RequestDecorator,
    StreamableHttpConfig, TransportCounters, TransportInfo,
};
use crate::correlator::OperationCorrelator;
use crate::error::{ConfigError, McpError, McpResult, ProtocolError, TransportError};
use crate::messages::ClientMessage;
use crate::sse::{self as frames, SseCodec, DEFAULT_MAX_EVENT_SIZE, MESSAGE_EVENT};

const TRANSPORT_TYPE: &str = "streamable-http";

/// Session header defined by the Streamable HTTP protocol.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// `Accept` value sent with every POST.
pub const ACCEPT_STREAMABLE: &str = "application/json,text/event-stream";

/// Server session bound to this transport instance.
///
/// Never mutated in place; each change publishes a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Id issued by the server, if any
    pub session_id: Option<String>,
}

struct Shared {
    correlator: Option<Arc<OperationCorrelator>>,
    streams: Vec<JoinHandle<()>>,
}

/// MCP client transport over Streamable HTTP.
pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    client: Client,
    decorator: RequestDecorator,
    session: watch::Sender<SessionState>,
    shared: Mutex<Shared>,
    signal: FailureSignal,
    counters: TransportCounters,
}

impl StreamableHttpTransport {
    /// Create a transport using the configured headers and auth.
    pub fn new(config: StreamableHttpConfig) -> McpResult<Self> {
        let decorator = RequestDecorator::from_config(&config.headers, config.auth.as_ref())?;
        Self::with_decorator(config, decorator)
    }

    /// Create a transport with explicit request hooks.
    pub fn with_decorator(
        config: StreamableHttpConfig,
        decorator: RequestDecorator,
    ) -> McpResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                McpError::transport_failure(TRANSPORT_TYPE, format!("HTTP client: {}", e))
            })?;
        Self::with_client(config, client, decorator)
    }

    /// Create a transport on a caller-supplied HTTP client.
    ///
    /// TLS and proxy settings come from `client`; the
    /// configured timeout still bounds every request.
    pub fn with_client(
        config: StreamableHttpConfig,
        client: Client,
        decorator: RequestDecorator,
    ) -> McpResult<Self> {
        config.validate()?;
        let (session, _) = watch::channel(SessionState::default());

        Ok(Self {
            config,
            client,
            decorator,
            session,
            shared: Mutex::new(Shared {
                correlator: None,
                streams: Vec::new(),
            }),
            signal: FailureSignal::new(),
            counters: TransportCounters::default(),
        })
    }

    /// The current session state.
    pub fn session(&self) -> SessionState {
        self.session.borrow().clone()
    }

    /// Observe session changes.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn correlator(&self) -> McpResult<Arc<OperationCorrelator>> {
        if self.signal.is_closed() {
            return Err(McpError::closed(TRANSPORT_TYPE));
        }
        self.lock().correlator.clone().ok_or_else(|| {
            TransportError::NotConnected {
                transport_type: TRANSPORT_TYPE.to_string(),
                reason: "transport has not been started".to_string(),
            }
            .into()
        })
    }

    fn session_header(&self, headers: &mut HeaderMap, session_id: &str) -> McpResult<()> {
        let value = HeaderValue::try_from(session_id).map_err(|e| {
            McpError::from(ConfigError::InvalidValue {
                parameter: MCP_SESSION_ID.to_string(),
                value: session_id.to_string(),
                reason: e.to_string(),
            })
        })?;
        headers.insert(MCP_SESSION_ID, value);
        Ok(())
    }

    /// POST one message and check the status; records any new session id.
    async fn post(&self, message: &ClientMessage) -> McpResult<Response> {
        let body = serde_json::to_vec(message)?;

        let session_id = if message.is_initialize() {
            None
        } else {
            self.session.borrow().session_id.clone()
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(ACCEPT_STREAMABLE),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(session_id) = &session_id {
            self.session_header(&mut headers, session_id)?;
        }
        self.decorator
            .decorate(&Method::POST, &self.config.url, Some(message), &mut headers)
            .await?;

        if self.config.log_requests {
            info!(
                "Streamable HTTP request to {}: {}",
                self.config.url,
                String::from_utf8_lossy(&body)
            );
        }
        self.counters.record_sent(message);

        let response = self
            .client
            .post(self.config.url.clone())
            .headers(headers)
            .body(body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| McpError::transport_failure(TRANSPORT_TYPE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if let (StatusCode::NOT_FOUND, Some(session_id)) = (status, session_id) {
                debug!("MCP session {} is unknown to the server", session_id);
                return Err(TransportError::SessionExpired { session_id }.into());
            }
            return Err(status_error(response).await);
        }

        if let Some(issued) = response
            .headers()
            .get(MCP_SESSION_ID)
            .and_then(|value| value.to_str().ok())
        {
            self.session.send_if_modified(|state| {
                if state.session_id.as_deref() == Some(issued) {
                    return false;
                }
                debug!("Assigned MCP session id {}", issued);
                *state = SessionState {
                    session_id: Some(issued.to_string()),
                };
                true
            });
        }

        Ok(response)
    }

    /// Route an inline event stream in the background.
    fn spawn_stream(&self, id: i64, response: Response, correlator: Arc<OperationCorrelator>) {
        let log_responses = self.config.log_responses;
        let handle = tokio::spawn(async move {
            let codec = SseCodec::new(DEFAULT_MAX_EVENT_SIZE);
            let mut events = frames::response_events(response, codec);
            let mut ended = "event stream ended before the response arrived".to_string();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        ended = format!("event stream failed before the response: {}", e);
                        break;
                    }
                };
                if event.is_ping() {
                    continue;
                }
                match event.name() {
                    Some(MESSAGE_EVENT) => match serde_json::from_str::<Value>(&event.data) {
                        Ok(message) => {
                            if log_responses {
                                info!("Streamable HTTP event: {}", event.data);
                            }
                            correlator.handle(message);
                        }
                        Err(e) => {
                            warn!("Dropping malformed event payload ({}): {}", e, event.data)
                        }
                    },
                    Some(other) => debug!("Ignoring event '{}'", other),
                    None => warn!("Skipping event without a name: {}", event.data),
                }
            }

            // no-op when the response already arrived
            correlator.fail(id, McpError::transport_failure(TRANSPORT_TYPE, ended));
        });

        let mut shared = self.lock();
        shared.streams.retain(|stream| !stream.is_finished());
        shared.streams.push(handle);
    }

    async fn send_delete(&self, session_id: &str) -> McpResult<()> {
        let mut headers = HeaderMap::new();
        self.session_header(&mut headers, session_id)?;
        self.decorator
            .decorate(&Method::DELETE, &self.config.url, None, &mut headers)
            .await?;

        let response = self
            .client
            .delete(self.config.url.clone())
            .headers(headers)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| McpError::transport_failure(TRANSPORT_TYPE, e.to_string()))?;
        debug!(
            "Session {} terminated with status {}",
            session_id,
            response.status()
        );
        Ok(())
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_event_stream_type)
}

fn is_event_stream_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default();
    essence.trim().eq_ignore_ascii_case("text/event-stream")
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn transport_type(&self) -> &'static str {
        TRANSPORT_TYPE
    }

    async fn start(&self, correlator: Arc<OperationCorrelator>) -> McpResult<()> {
        if self.signal.is_closed() {
            return Err(McpError::closed(TRANSPORT_TYPE));
        }
        let mut shared = self.lock();
        if shared.correlator.is_some() {
            return Err(ProtocolError::StateViolation {
                reason: "Streamable HTTP transport already started".to_string(),
            }
            .into());
        }
        shared.correlator = Some(correlator);
        debug!("Streamable HTTP transport ready for {}", self.config.url);
        Ok(())
    }

    async fn execute_with_response(&self, message: ClientMessage) -> McpResult<Value> {
        let id = require_id(&message)?;
        let correlator = self.correlator()?;
        let pending = correlator.start(id)?;

        let response = match self.post(&message).await {
            Ok(response) => response,
            Err(e) => {
                self.counters.record_error();
                return Err(e);
            }
        };

        if is_event_stream(&response) {
            self.spawn_stream(id, response, Arc::clone(&correlator));
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| McpError::transport_failure(TRANSPORT_TYPE, e.to_string()))?;
            if self.config.log_responses {
                info!("Streamable HTTP response: {}", String::from_utf8_lossy(&body));
            }
            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Array(messages)) => {
                    messages.into_iter().for_each(|m| correlator.handle(m))
                }
                Ok(message) => correlator.handle(message),
                Err(e) => {
                    self.counters.record_error();
                    return Err(McpError::malformed(format!(
                        "response body is not JSON: {}",
                        e
                    )));
                }
            }
            correlator.fail(
                id,
                ProtocolError::InvalidResponse {
                    reason: format!("response body did not answer request {}", id),
                }
                .into(),
            );
        }

        let result = pending.wait(self.config.timeout).await;
        match &result {
            Ok(_) => self.counters.record_response(),
            Err(_) => self.counters.record_error(),
        }
        result
    }

    async fn execute_without_response(&self, message: ClientMessage) -> McpResult<()> {
        self.correlator()?;
        match self.post(&message).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.counters.record_error();
                Err(e)
            }
        }
    }

    fn on_failure(&self, callback: FailureCallback) {
        // no persistent channel: nothing can terminate unsolicited
        self.signal.register(callback);
    }

    async fn close(&self) -> McpResult<()> {
        if !self.signal.mark_closed() {
            return Ok(());
        }

        let (streams, correlator) = {
            let mut shared = self.lock();
            (std::mem::take(&mut shared.streams), shared.correlator.take())
        };
        for stream in streams {
            stream.abort();
        }
        if let Some(correlator) = correlator {
            correlator.fail_all(McpError::closed(TRANSPORT_TYPE));
        }

        let session_id = self.session.borrow().session_id.clone();
        if let Some(session_id) = session_id {
            if let Err(e) = self.send_delete(&session_id).await {
                debug!("Failed to terminate session {}: {}", session_id, e);
            }
        }
        debug!("Streamable HTTP transport to {} closed", self.config.url);
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        let connected = !self.signal.is_closed() && self.lock().correlator.is_some();
        self.counters.snapshot(
            TRANSPORT_TYPE,
            connected,
            Some(self.config.url.to_string()),
            self.session.borrow().session_id.clone(),
        )
    }
}

impl Drop for StreamableHttpTransport {
    fn drop(&mut self) {
        for stream in self.lock().streams.drain(..) {
            stream.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> StreamableHttpTransport {
        StreamableHttpTransport::new(StreamableHttpConfig::new(
            "http://localhost:1/mcp".parse().unwrap(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_requires_start() {
        let transport = transport();
        let err = transport
            .execute_with_response(ClientMessage::request_without_params(1, "ping"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::Transport(TransportError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_notification_cannot_expect_response() {
        let transport = transport();
        transport
            .start(Arc::new(OperationCorrelator::new(None)))
            .await
            .unwrap();

        let err = transport
            .execute_with_response(ClientMessage::initialized())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            McpError::Protocol(ProtocolError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_event_stream_media_type() {
        assert!(is_event_stream_type("text/event-stream"));
        assert!(is_event_stream_type("Text/Event-Stream; charset=utf-8"));
        assert!(is_event_stream_type(" TEXT/EVENT-STREAM"));
        assert!(!is_event_stream_type("application/json"));
        assert!(!is_event_stream_type("text/event-stream-ish"));
        assert!(!is_event_stream_type(""));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let transport = transport();
        transport
            .start(Arc::new(OperationCorrelator::new(None)))
            .await
            .unwrap();

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.info().connected);
        assert!(transport
            .start(Arc::new(OperationCorrelator::new(None)))
            .await
            .is_err());
    }
}
