//! Legacy HTTP+SSE transport against a local mock server.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{MockSseServer, Reply, Responder};
use mcp_http_transport::error::{McpError, ProtocolError, TransportError};
use mcp_http_transport::transport::sse::{ConnectionState, HttpSseTransport};
use mcp_http_transport::transport::{AuthConfig, RequestDecorator, SseConfig};
use mcp_http_transport::{
    ClientMessage, Implementation, McpSession, McpTransport, OperationCorrelator, SessionStatus,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn config(server: &MockSseServer) -> SseConfig {
    SseConfig::new(server.sse_url().parse().unwrap()).timeout(Duration::from_secs(5))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "mock-sse", "version": "1.0.0"}
    })
}

/// Answers on the stream like a well-behaved server; `fail` gets a 500 and
/// `hang` is accepted but never answered.
fn mcp_responder() -> Responder {
    Arc::new(|message: &Value| {
        let id = message.get("id").cloned();
        match (message.get("method").and_then(Value::as_str), id) {
            (Some("initialize"), Some(id)) => Reply::accepted()
                .with_event(json!({"jsonrpc": "2.0", "id": id, "result": initialize_result()}))
                .delayed(Duration::from_millis(100)),
            (Some("fail"), _) => Reply::status(500, "internal error"),
            (Some("hang"), _) => Reply::accepted(),
            (Some("slow"), Some(id)) => Reply::accepted()
                .with_event(json!({"jsonrpc": "2.0", "id": id, "result": "slow"}))
                .delayed(Duration::from_millis(200)),
            (Some(method), Some(id)) => Reply::accepted()
                .with_event(json!({"jsonrpc": "2.0", "id": id, "result": {"method": method}})),
            _ => Reply::accepted(),
        }
    })
}

fn silent_responder() -> Responder {
    Arc::new(|_: &Value| Reply::accepted())
}

#[tokio::test]
async fn test_endpoint_is_resolved_and_response_correlated() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/post-here"), silent_responder()).await;
    let sse_url = format!("{}/sse?client=test-client", server.origin());
    let transport = Arc::new(HttpSseTransport::new(
        SseConfig::new(sse_url.parse()?).timeout(Duration::from_secs(5)),
    )?);

    transport.start(Arc::new(OperationCorrelator::new(None))).await?;
    assert_eq!(transport.state(), ConnectionState::Ready);
    assert_eq!(
        transport.post_url().map(|url| url.to_string()),
        Some(format!("{}/post-here", server.origin()))
    );

    let call = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move {
            transport
                .execute_with_response(ClientMessage::request(1, "tools/call", json!({})))
                .await
        }
    });

    server.wait_for_posts(1).await;
    server.push("event: message\ndata: {\"id\":1,\"result\":\"ok\"}\n\n");

    let response = call.await??;
    assert_eq!(response["result"], "ok");

    let posts = server.posts();
    assert_eq!(posts[0].path, "/post-here");
    assert_eq!(posts[0].header("content-type"), Some("application/json"));
    assert_eq!(posts[0].body["method"], "tools/call");
    Ok(())
}

#[tokio::test]
async fn test_configured_headers_reach_subscription_and_posts() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let config = config(&server)
        .auth(AuthConfig::bearer("sse-token"))
        .header("x-client", "test-client");
    let transport = HttpSseTransport::new(config)?;
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;

    assert_eq!(server.subscription_header("accept").as_deref(), Some("text/event-stream"));
    assert_eq!(
        server.subscription_header("authorization").as_deref(),
        Some("Bearer sse-token")
    );
    assert_eq!(server.subscription_header("x-client").as_deref(), Some("test-client"));

    transport
        .execute_without_response(ClientMessage::notification(
            "notifications/roots/list_changed",
            json!({}),
        ))
        .await?;
    let posts = server.posts();
    assert_eq!(posts[0].header("authorization"), Some("Bearer sse-token"));
    assert_eq!(posts[0].header("x-client"), Some("test-client"));
    assert!(posts[0].body.get("id").is_none());
    Ok(())
}

#[tokio::test]
async fn test_initialized_is_sent_after_initialize_response() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), mcp_responder()).await;
    let session = McpSession::new(Arc::new(HttpSseTransport::new(config(&server))?), None);

    let result = session.connect(Implementation::new("test-client", "0.1.0")).await?;
    assert_eq!(result.server_info.name, "mock-sse");
    assert_eq!(session.status(), SessionStatus::Ready);

    server.wait_for_posts(2).await;
    let log = server.log();
    let responded = log.iter().position(|entry| entry == "responded initialize");
    let initialized = log
        .iter()
        .position(|entry| entry == "received notifications/initialized");
    assert!(
        responded.is_some() && initialized.is_some() && responded < initialized,
        "unexpected order: {:?}",
        log
    );

    let methods: Vec<_> = server
        .posts()
        .iter()
        .map(|post| post.method().unwrap_or_default().to_string())
        .collect();
    assert_eq!(methods, ["initialize", "notifications/initialized"]);
    Ok(())
}

#[tokio::test]
async fn test_pings_and_unnamed_events_are_dropped() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let transport = HttpSseTransport::new(config(&server))?;
    transport
        .start(Arc::new(OperationCorrelator::new(Some(Arc::new(tx)))))
        .await?;

    server.push(": keep-alive\n\n");
    server.push("event: message\ndata:\n\n");
    server.push("event: message\ndata: \n\n");
    server.push("data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/unnamed\"}\n\n");
    server.push(&common::message_event(
        &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
    ));

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("handler channel open");
    assert_eq!(first["method"], "notifications/tools/list_changed");
    assert!(rx.try_recv().is_err());
    assert_eq!(transport.state(), ConnectionState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_response_resolves_once() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let transport = Arc::new(HttpSseTransport::new(config(&server))?);
    transport
        .start(Arc::new(OperationCorrelator::new(Some(Arc::new(tx)))))
        .await?;

    let call = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move {
            transport
                .execute_with_response(ClientMessage::request_without_params(7, "tools/list"))
                .await
        }
    });
    server.wait_for_posts(1).await;
    server.push("event: message\ndata: {\"id\":7,\"result\":\"first\"}\n\n");
    server.push("event: message\ndata: {\"id\":7,\"result\":\"second\"}\n\n");
    server.push("event: message\ndata: {\"method\":\"notifications/sync\"}\n\n");

    let response = call.await??;
    assert_eq!(response["result"], "first");

    // events are dispatched in order, so the duplicate has been dropped by now
    let sync = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("handler channel open");
    assert_eq!(sync["method"], "notifications/sync");

    let call = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move {
            transport
                .execute_with_response(ClientMessage::request_without_params(7, "tools/list"))
                .await
        }
    });
    server.wait_for_posts(2).await;
    server.push("event: message\ndata: {\"id\":7,\"result\":\"third\"}\n\n");
    assert_eq!(call.await??["result"], "third");
    assert_eq!(transport.info().responses_received, 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_post_only_fails_its_operation() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), mcp_responder()).await;
    let transport = HttpSseTransport::new(config(&server))?;
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;

    let (failed, slow) = tokio::join!(
        transport.execute_with_response(ClientMessage::request_without_params(1, "fail")),
        transport.execute_with_response(ClientMessage::request_without_params(2, "slow")),
    );

    match failed {
        Err(McpError::Transport(TransportError::UnexpectedStatus { code, body })) => {
            assert_eq!(code, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("expected a 500, got {:?}", other),
    }
    assert_eq!(slow?["result"], "slow");
    assert_eq!(transport.state(), ConnectionState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_post_auth_rejection_carries_challenge() -> anyhow::Result<()> {
    let responder: Responder = Arc::new(|_: &Value| {
        Reply::status(401, "").header("WWW-Authenticate", "Bearer realm=\"mcp\"")
    });
    let server = MockSseServer::start(Some("/messages"), responder).await;
    let transport = HttpSseTransport::new(config(&server))?;
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;

    let err = transport
        .execute_with_response(ClientMessage::request_without_params(1, "tools/list"))
        .await
        .unwrap_err();
    match err {
        McpError::Transport(TransportError::Authentication { code, challenge }) => {
            assert_eq!(code, 401);
            assert_eq!(challenge.as_deref(), Some("Bearer realm=\"mcp\""));
        }
        other => panic!("expected an authentication error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_end_fires_failure_once_and_fails_session() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), mcp_responder()).await;
    let session = Arc::new(McpSession::new(
        Arc::new(HttpSseTransport::new(config(&server))?),
        None,
    ));
    session.connect(Implementation::new("test-client", "0.1.0")).await?;

    let hanging = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.request("hang", None).await }
    });
    server.wait_for_posts(3).await;
    assert_eq!(session.pending_requests(), 1);

    let mut status = session.subscribe_status();
    server.close_stream();

    let err = hanging.await?.unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::TransportFailure { .. })
    ));
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|status| matches!(status, SessionStatus::Failed(_))),
    )
    .await??;
    assert!(session.is_failed());
    assert_eq!(session.pending_requests(), 0);

    let err = session.request("tools/list", None).await.unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::TransportFailure { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_failure_callback_fires_exactly_once() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let transport = HttpSseTransport::new(config(&server))?;

    let fired = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<McpError>();
    transport.on_failure(Box::new({
        let fired = Arc::clone(&fired);
        move |error| {
            fired.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(error);
        }
    }));
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;

    server.close_stream();
    let error = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("failure delivered");
    assert!(matches!(
        error,
        McpError::Transport(TransportError::TransportFailure { .. })
    ));
    assert_eq!(transport.state(), ConnectionState::Failed);

    transport.close().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_silent() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let transport = Arc::new(HttpSseTransport::new(config(&server))?);

    let fired = Arc::new(AtomicUsize::new(0));
    transport.on_failure(Box::new({
        let fired = Arc::clone(&fired);
        move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        }
    }));
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;

    let pending = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move {
            transport
                .execute_with_response(ClientMessage::request_without_params(1, "tools/list"))
                .await
        }
    });
    server.wait_for_posts(1).await;

    transport.close().await?;
    transport.close().await?;
    server.close_stream();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        pending.await?,
        Err(McpError::Transport(TransportError::Closed { .. }))
    ));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(!transport.info().connected);

    let err = transport
        .execute_with_response(ClientMessage::request_without_params(2, "tools/list"))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Transport(TransportError::Closed { .. })));
    Ok(())
}

#[tokio::test]
async fn test_first_event_must_be_endpoint() -> anyhow::Result<()> {
    let server = MockSseServer::start(None, silent_responder()).await;
    server.push(": comment first\n\n");
    server.push("event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"hello\"}\n\n");

    let transport = HttpSseTransport::new(config(&server))?;
    let err = transport
        .start(Arc::new(OperationCorrelator::new(None)))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::Transport(TransportError::Handshake { .. })));
    assert_eq!(transport.state(), ConnectionState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_missing_endpoint_times_out() -> anyhow::Result<()> {
    let server = MockSseServer::start(None, silent_responder()).await;
    let transport =
        HttpSseTransport::new(config(&server).timeout(Duration::from_millis(300)))?;

    let err = transport
        .start(Arc::new(OperationCorrelator::new(None)))
        .await
        .unwrap_err();
    match err {
        McpError::Transport(TransportError::Handshake { reason, .. }) => {
            assert!(reason.contains("no endpoint event"), "{}", reason)
        }
        other => panic!("expected a handshake error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_reported_by_session() -> anyhow::Result<()> {
    let responder: Responder = Arc::new(|message: &Value| {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        match message.get("method").and_then(Value::as_str) {
            Some("initialize") => Reply::accepted()
                .with_event(json!({"jsonrpc": "2.0", "id": id, "result": initialize_result()})),
            Some("missing") => Reply::accepted().with_event(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            })),
            _ => Reply::accepted(),
        }
    });
    let server = MockSseServer::start(Some("/messages"), responder).await;
    let session = McpSession::new(Arc::new(HttpSseTransport::new(config(&server))?), None);
    session.connect(Implementation::new("test-client", "0.1.0")).await?;

    let err = session.request("missing", None).await.unwrap_err();
    assert!(matches!(
        err,
        McpError::Protocol(ProtocolError::ServerError { code: -32601, .. })
    ));
    assert_eq!(session.status(), SessionStatus::Ready);

    session.close().await?;
    assert_eq!(session.status(), SessionStatus::Closed);
    Ok(())
}

#[tokio::test]
async fn test_failed_handshake_closes_subscription() -> anyhow::Result<()> {
    let responder: Responder = Arc::new(|_: &Value| Reply::status(500, "not today"));
    let server = MockSseServer::start(Some("/messages"), responder).await;
    let transport = Arc::new(HttpSseTransport::new(config(&server))?);
    let session = McpSession::new(transport.clone(), None);

    let err = session
        .connect(Implementation::new("test-client", "0.1.0"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::UnexpectedStatus { code: 500, .. })
    ));
    assert!(session.is_failed());
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(!transport.info().connected);
    Ok(())
}

#[tokio::test]
async fn test_refused_post_fails_only_that_operation() -> anyhow::Result<()> {
    let endpoint = common::refused_url("/messages");
    let server = MockSseServer::start(Some(endpoint.as_str()), silent_responder()).await;
    let correlator = Arc::new(OperationCorrelator::new(None));
    let transport = HttpSseTransport::new(config(&server))?;
    transport.start(Arc::clone(&correlator)).await?;
    assert_eq!(transport.post_url().map(|url| url.to_string()), Some(endpoint));

    let err = transport
        .execute_with_response(ClientMessage::request_without_params(1, "tools/list"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::TransportFailure { .. })
    ));
    assert_eq!(correlator.pending_count(), 0);

    let err = transport
        .execute_without_response(ClientMessage::initialized())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        McpError::Transport(TransportError::TransportFailure { .. })
    ));

    // the subscription itself is unaffected
    assert_eq!(transport.state(), ConnectionState::Ready);
    assert_eq!(transport.info().errors, 2);
    Ok(())
}

#[tokio::test]
async fn test_supplied_client_carries_subscription_and_posts() -> anyhow::Result<()> {
    let server = MockSseServer::start(Some("/messages"), silent_responder()).await;
    let mut defaults = reqwest::header::HeaderMap::new();
    defaults.insert("x-pool", reqwest::header::HeaderValue::from_static("shared"));
    let client = reqwest::Client::builder().default_headers(defaults).build()?;

    let transport = HttpSseTransport::with_client(
        config(&server),
        client,
        RequestDecorator::new(None, None),
    )?;
    transport.start(Arc::new(OperationCorrelator::new(None))).await?;
    transport
        .execute_without_response(ClientMessage::initialized())
        .await?;

    assert_eq!(server.subscription_header("x-pool").as_deref(), Some("shared"));
    assert_eq!(server.posts()[0].header("x-pool"), Some("shared"));
    Ok(())
}
