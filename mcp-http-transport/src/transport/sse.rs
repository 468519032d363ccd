//! Legacy HTTP+SSE transport (protocol 2024-11-05).
//!
//! Lifecycle: `Created -> Connecting -> Ready -> (Failed | Closed)`.
//!
//! 1. `start` opens a GET subscription to the SSE URL and waits, bounded by
//!    the configured timeout, for the server's `endpoint` event.
//! 2. The event data is resolved against the SSE URL to obtain the POST URL.
//! 3. Every client message is POSTed there; every server message, responses
//!    included, arrives on the subscription as a `message` event.
//!
//! When the subscription ends on its own the failure signal fires once.
//! Operations still pending at that point belong to the owner to fail.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    require_id, status_error, FailureCallback, FailureSignal, McpTransport, RequestDecorator,
    SseConfig, TransportCounters, TransportInfo,
};
use crate::correlator::OperationCorrelator;
use crate::error::{McpError, McpResult, ProtocolError, TransportError};
use crate::messages::ClientMessage;
use crate::sse::{self as frames, SseCodec, SseEvent, ENDPOINT_EVENT, MESSAGE_EVENT};

const TRANSPORT_TYPE: &str = "sse";

type EventStream = Pin<Box<dyn Stream<Item = McpResult<SseEvent>> + Send>>;

/// Connection lifecycle of an [`HttpSseTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started yet
    Created,
    /// Waiting for the `endpoint` event
    Connecting,
    /// POST URL known, subscription alive
    Ready,
    /// Handshake failed or subscription terminated; unusable
    Failed,
    /// Closed by the owner
    Closed,
}

struct Inner {
    state: ConnectionState,
    post_url: Option<Url>,
    correlator: Option<Arc<OperationCorrelator>>,
    reader: Option<JoinHandle<()>>,
}

type SharedInner = Arc<Mutex<Inner>>;

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MCP client transport over HTTP+SSE.
pub struct HttpSseTransport {
    config: SseConfig,
    client: Client,
    decorator: RequestDecorator,
    inner: SharedInner,
    signal: Arc<FailureSignal>,
    counters: TransportCounters,
}

impl HttpSseTransport {
    /// Create a transport using the configured headers and auth.
    pub fn new(config: SseConfig) -> McpResult<Self> {
        let decorator = RequestDecorator::from_config(&config.headers, config.auth.as_ref())?;
        Self::with_decorator(config, decorator)
    }

    /// Create a transport with explicit request hooks.
    pub fn with_decorator(config: SseConfig, decorator: RequestDecorator) -> McpResult<Self> {
        // no overall request timeout: the subscription is long-lived
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
    /// The client must not carry an overall request timeout, or the
    /// subscription is cut off once it elapses.
    pub fn with_client(
        config: SseConfig,
        client: Client,
        decorator: RequestDecorator,
    ) -> McpResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            client,
            decorator,
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Created,
                post_url: None,
                correlator: None,
                reader: None,
            })),
            signal: Arc::new(FailureSignal::new()),
            counters: TransportCounters::default(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// The POST URL announced by the server, once the handshake completed.
    pub fn post_url(&self) -> Option<Url> {
        lock(&self.inner).post_url.clone()
    }

    fn handshake_error(&self, reason: impl Into<String>) -> McpError {
        TransportError::Handshake {
            url: self.config.url.to_string(),
            reason: reason.into(),
        }
        .into()
    }

    /// Open the subscription and read up to the `endpoint` event.
    async fn handshake(&self) -> McpResult<(Url, EventStream)> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        self.decorator
            .decorate(&Method::GET, &self.config.url, None, &mut headers)
            .await?;

        debug!("Opening SSE subscription to {}", self.config.url);
        let response = self
            .client
            .get(self.config.url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.handshake_error(format!("connection failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.handshake_error(format!("status {}: {}", status.as_u16(), body)));
        }

        let mut events: EventStream = Box::pin(frames::response_events(
            response,
            SseCodec::new(self.config.max_event_size),
        ));

        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(self.handshake_error(e.to_string())),
                None => return Err(self.handshake_error("stream ended before endpoint event")),
            };
            if event.is_ping() {
                continue;
            }

            if event.name() != Some(ENDPOINT_EVENT) {
                return Err(self.handshake_error(format!(
                    "expected '{}' event first, got {:?}",
                    ENDPOINT_EVENT,
                    event.name()
                )));
            }

            let endpoint = event.data.trim();
            let post_url = self.config.url.join(endpoint).map_err(|e| {
                McpError::from(TransportError::InvalidUrl {
                    url: endpoint.to_string(),
                    reason: e.to_string(),
                })
            })?;
            debug!("SSE endpoint announced: {}", post_url);
            return Ok((post_url, events));
        }
    }

    /// POST URL and correlator of a ready transport.
    fn ready(&self) -> McpResult<(Url, Arc<OperationCorrelator>)> {
        let inner = lock(&self.inner);
        match (inner.state, &inner.post_url, &inner.correlator) {
            (ConnectionState::Ready, Some(url), Some(correlator)) => {
                Ok((url.clone(), Arc::clone(correlator)))
            }
            (ConnectionState::Closed, _, _) => Err(McpError::closed(TRANSPORT_TYPE)),
            (state, _, _) => Err(TransportError::NotConnected {
                transport_type: TRANSPORT_TYPE.to_string(),
                reason: format!("transport is {:?}", state),
            }
            .into()),
        }
    }

    async fn post(&self, post_url: &Url, message: &ClientMessage) -> McpResult<()> {
        let body = serde_json::to_vec(message)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.decorator
            .decorate(&Method::POST, post_url, Some(message), &mut headers)
            .await?;

        if self.config.log_requests {
            info!("SSE request to {}: {}", post_url, String::from_utf8_lossy(&body));
        }
        self.counters.record_sent(message);

        let response = self
            .client
            .post(post_url.clone())
            .headers(headers)
            .body(body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| McpError::transport_failure(TRANSPORT_TYPE, e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for HttpSseTransport {
    fn transport_type(&self) -> &'static str {
        TRANSPORT_TYPE
    }

    async fn start(&self, correlator: Arc<OperationCorrelator>) -> McpResult<()> {
        {
            let mut inner = lock(&self.inner);
            if inner.state != ConnectionState::Created {
                return Err(ProtocolError::StateViolation {
                    reason: format!("cannot start an SSE transport that is {:?}", inner.state),
                }
                .into());
            }
            inner.state = ConnectionState::Connecting;
            inner.correlator = Some(Arc::clone(&correlator));
        }

        let handshake = tokio::time::timeout(self.config.timeout, self.handshake()).await;
        let (post_url, events) = match handshake {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                lock(&self.inner).state = ConnectionState::Failed;
                return Err(e);
            }
            Err(_) => {
                lock(&self.inner).state = ConnectionState::Failed;
                return Err(self.handshake_error(format!(
                    "no endpoint event within {:?}",
                    self.config.timeout
                )));
            }
        };

        let mut inner = lock(&self.inner);
        if self.signal.is_closed() {
            return Err(McpError::closed(TRANSPORT_TYPE));
        }
        inner.state = ConnectionState::Ready;
        inner.post_url = Some(post_url);
        inner.reader = Some(tokio::spawn(read_events(
            events,
            correlator,
            Arc::clone(&self.inner),
            Arc::clone(&self.signal),
            self.config.log_responses,
        )));
        Ok(())
    }

    async fn execute_with_response(&self, message: ClientMessage) -> McpResult<Value> {
        let id = require_id(&message)?;
        let (post_url, correlator) = self.ready()?;

        // registered before the POST so an early response cannot be lost
        let pending = correlator.start(id)?;
        if let Err(e) = self.post(&post_url, &message).await {
            self.counters.record_error();
            return Err(e);
        }

        let result = pending.wait(self.config.timeout).await;
        match &result {
            Ok(_) => self.counters.record_response(),
            Err(_) => self.counters.record_error(),
        }
        result
    }

    async fn execute_without_response(&self, message: ClientMessage) -> McpResult<()> {
        let (post_url, _) = self.ready()?;
        let result = self.post(&post_url, &message).await;
        if result.is_err() {
            self.counters.record_error();
        }
        result
    }

    fn on_failure(&self, callback: FailureCallback) {
        self.signal.register(callback);
    }

    async fn close(&self) -> McpResult<()> {
        if !self.signal.mark_closed() {
            return Ok(());
        }

        let (reader, correlator) = {
            let mut inner = lock(&self.inner);
            inner.state = ConnectionState::Closed;
            (inner.reader.take(), inner.correlator.take())
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(correlator) = correlator {
            correlator.fail_all(McpError::closed(TRANSPORT_TYPE));
        }
        debug!("SSE transport to {} closed", self.config.url);
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        let inner = lock(&self.inner);
        self.counters.snapshot(
            TRANSPORT_TYPE,
            inner.state == ConnectionState::Ready,
            inner.post_url.as_ref().map(Url::to_string),
            None,
        )
    }
}

impl Drop for HttpSseTransport {
    fn drop(&mut self) {
        self.signal.mark_closed();
        if let Some(reader) = lock(&self.inner).reader.take() {
            reader.abort();
        }
    }
}

/// Subscription reader: dispatch events until the stream ends.
async fn read_events(
    mut events: EventStream,
    correlator: Arc<OperationCorrelator>,
    inner: SharedInner,
    signal: Arc<FailureSignal>,
    log_responses: bool,
) {
    let error = loop {
        match events.next().await {
            Some(Ok(event)) => dispatch(event, &correlator, log_responses),
            Some(Err(e)) => break e,
            None => break McpError::transport_failure(TRANSPORT_TYPE, "SSE stream ended"),
        }
    };

    {
        let mut inner = lock(&inner);
        if inner.state == ConnectionState::Ready {
            inner.state = ConnectionState::Failed;
        }
    }
    let error = match error {
        error @ McpError::Transport(TransportError::TransportFailure { .. }) => error,
        other => McpError::transport_failure(TRANSPORT_TYPE, other.to_string()),
    };
    signal.fire(error);
}

fn dispatch(event: SseEvent, correlator: &OperationCorrelator, log_responses: bool) {
    if event.is_ping() {
        return;
    }
    match event.name() {
        Some(MESSAGE_EVENT) => match serde_json::from_str::<Value>(&event.data) {
            Ok(message) => {
                if log_responses {
                    info!("SSE message: {}", event.data);
                }
                correlator.handle(message);
            }
            Err(e) => warn!("Dropping malformed SSE message ({}): {}", e, event.data),
        },
        Some(ENDPOINT_EVENT) => debug!("Ignoring repeated endpoint event: {}", event.data),
        Some(other) => debug!("Ignoring SSE event '{}'", other),
        None => warn!("Skipping SSE event without a name: {}", event.data),
    }
}
