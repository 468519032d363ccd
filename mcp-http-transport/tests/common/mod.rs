//! Minimal legacy HTTP+SSE server for integration tests.
//!
//! `GET /sse` opens the event stream (one subscriber). Any other `POST`
//! records the message and answers through a responder closure that may
//! also push events onto the stream.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Server reaction to one POST.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub events: Vec<String>,
    pub delay: Duration,
}

impl Reply {
    pub fn accepted() -> Self {
        Self::status(202, "")
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
            events: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Push `message` as a `message` event after answering the POST.
    pub fn with_event(mut self, message: Value) -> Self {
        self.events.push(message_event(&message));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// A recorded POST.
#[derive(Debug, Clone)]
pub struct ReceivedPost {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ReceivedPost {
    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

enum StreamCommand {
    Event(String),
    Close,
}

struct ServerState {
    endpoint: Option<String>,
    responder: Responder,
    commands: mpsc::UnboundedSender<StreamCommand>,
    stream: Mutex<Option<mpsc::UnboundedReceiver<StreamCommand>>>,
    posts: Mutex<Vec<ReceivedPost>>,
    subscription: Mutex<Option<HeaderMap>>,
    log: Mutex<Vec<String>>,
}

impl ServerState {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

pub struct MockSseServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockSseServer {
    /// Start listening. With `endpoint` set, the stream opens with that
    /// `endpoint` event.
    pub async fn start(endpoint: Option<&str>, responder: Responder) -> Self {
        let (commands, stream) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            endpoint: endpoint.map(str::to_string),
            responder,
            commands,
            stream: Mutex::new(Some(stream)),
            posts: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
            log: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/sse", get(subscribe))
            .fallback(receive)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn sse_url(&self) -> String {
        format!("{}/sse", self.origin())
    }

    /// Write a raw SSE record to the stream.
    pub fn push(&self, record: &str) {
        let _ = self
            .state
            .commands
            .send(StreamCommand::Event(record.to_string()));
    }

    /// End the event stream cleanly.
    pub fn close_stream(&self) {
        let _ = self.state.commands.send(StreamCommand::Close);
    }

    pub fn posts(&self) -> Vec<ReceivedPost> {
        self.state.posts.lock().unwrap().clone()
    }

    /// Headers of the GET that opened the event stream.
    pub fn subscription_header(&self, name: &str) -> Option<String> {
        let subscription = self.state.subscription.lock().unwrap();
        subscription
            .as_ref()?
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    /// `received <method>` and `responded <method>` entries in order.
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    pub async fn wait_for_posts(&self, count: usize) {
        for _ in 0..500 {
            if self.state.posts.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not receive {} POSTs", count);
    }
}

impl Drop for MockSseServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn message_event(message: &Value) -> String {
    format!("event: message\ndata: {}\n\n", message)
}

/// An `http://` URL on a port nothing listens on.
pub fn refused_url(path: &str) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}{}", addr, path)
}

async fn subscribe(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let receiver = state.stream.lock().unwrap().take();
    let Some(receiver) = receiver else {
        return StatusCode::CONFLICT.into_response();
    };
    *state.subscription.lock().unwrap() = Some(headers);

    // records are written verbatim so tests control the exact framing
    let opening = state
        .endpoint
        .as_ref()
        .map(|endpoint| format!("event: endpoint\ndata: {}\n\n", endpoint));
    let records = futures::stream::iter(opening)
        .chain(
            UnboundedReceiverStream::new(receiver)
                .take_while(|command| future::ready(matches!(command, StreamCommand::Event(_))))
                .filter_map(|command| {
                    future::ready(match command {
                        StreamCommand::Event(record) => Some(record),
                        StreamCommand::Close => None,
                    })
                }),
        )
        .map(Ok::<_, Infallible>);

    (
        [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(records),
    )
        .into_response()
}

async fn receive(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let rpc_method = body
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string();

    state.record(format!("received {}", rpc_method));
    state.posts.lock().unwrap().push(ReceivedPost {
        path: uri.path().to_string(),
        headers,
        body: body.clone(),
    });

    let reply = (state.responder)(&body);
    let mut response = (StatusCode::from_u16(reply.status).unwrap(), reply.body).into_response();
    for (name, value) in &reply.headers {
        response.headers_mut().insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    if !reply.events.is_empty() {
        let events = reply.events;
        let delay = reply.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.record(format!("responded {}", rpc_method));
            for event in events {
                let _ = state.commands.send(StreamCommand::Event(event));
            }
        });
    }

    response
}
