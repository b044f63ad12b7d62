//! Black-box integration tests: drive whole transports and the server
//! dispatcher end-to-end rather than poking at actor internals directly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use rpc_core::auth::{AuthProvider, AuthToken, StaticAuth};
use rpc_core::error::{CallError, RpcError, TransportError};
use rpc_core::server::auth::{bearer_auth, no_auth};
use rpc_core::server::target::ServerTargetBuilder;
use rpc_core::server::RpcHandler;
use rpc_core::transport::composite::CompositeTransport;
use rpc_core::transport::local::{LocalTarget, LocalTransport};
use rpc_core::transport::websocket::{ConnectionState, QueueFullBehavior, ReconnectConfig, ReconnectingWsTransport};
use rpc_core::Transport;

async fn spawn_echo_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value.get("type").and_then(Value::as_str) == Some("ping") {
                        let pong = json!({"type": "pong"});
                        let _ = ws.send(Message::Text(pong.to_string())).await;
                        continue;
                    }
                    if let Some(id) = value.get("id") {
                        let response = json!({"id": id, "result": {"echo": value.get("path")}});
                        let _ = ws.send(Message::Text(response.to_string())).await;
                    }
                }
            }
        }
    });
    (format!("ws://{addr}"), handle)
}

/// A server that accepts the connection but never answers any call — used
/// to drive the per-call deadline timer.
async fn spawn_silent_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while ws.next().await.is_some() {
                // Drain inbound frames, reply to nothing.
            }
        }
    });
    (format!("ws://{addr}"), handle)
}

#[tokio::test]
async fn nested_call_round_trips_through_ws_echo_server() {
    let (url, _server) = spawn_echo_server().await;
    let transport = ReconnectingWsTransport::connect(url, ReconnectConfig::default());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = transport.call("db.users.find", vec![json!({"id": "1"})]).await.unwrap();
    assert_eq!(result["echo"], "db.users.find");
}

#[tokio::test]
async fn call_without_response_times_out() {
    let (url, _server) = spawn_silent_server().await;
    let mut config = ReconnectConfig::default();
    config.request_timeout = Duration::from_millis(50);
    let transport = ReconnectingWsTransport::connect(url, config);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = transport.call("slow.op", vec![]).await.unwrap_err();
    match err {
        CallError::Transport(TransportError::RequestTimeout(_)) => {}
        other => panic!("expected RequestTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_succeeds_once_server_starts_listening() {
    // Reserve a port, but don't bind it yet: the transport's first few
    // connect attempts must fail and schedule a reconnect before the
    // listener comes up.
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mut config = ReconnectConfig::default();
    config.initial_delay = Duration::from_millis(20);
    config.max_delay = Duration::from_millis(50);
    config.connect_timeout = Duration::from_millis(100);

    let mut transport = ReconnectingWsTransport::connect(format!("ws://{addr}"), config);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        if let Ok((stream, _)) = listener.accept().await {
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let value: Value = serde_json::from_str(&text).unwrap();
                if let Some(id) = value.get("id") {
                    let response = json!({"id": id, "result": "ok"});
                    let _ = ws.send(Message::Text(response.to_string())).await;
                }
            }
        }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if transport.state() == ConnectionState::Connected {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never reached Connected");
        transport.state_changed().await;
    }

    let result = transport.call("ping", vec![]).await.unwrap();
    assert_eq!(result, json!("ok"));
}

#[tokio::test]
async fn insecure_auth_token_is_refused_over_plaintext_scheme() {
    let (url, _server) = spawn_echo_server().await;
    let auth: Arc<dyn AuthProvider> = Arc::new(StaticAuth::new("secret-token"));
    let config = ReconnectConfig::default(); // allow_insecure_auth defaults to false
    let transport = ReconnectingWsTransport::connect_with_auth(url, config, Some(auth));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = transport.call("anything", vec![]).await.unwrap_err();
    match err {
        CallError::Transport(TransportError::InsecureConnection) => {}
        CallError::Transport(TransportError::Closed) => {}
        other => panic!("expected InsecureConnection (or Closed after it), got {other:?}"),
    }
}

#[tokio::test]
async fn send_queue_overflow_errors_under_default_policy() {
    // No listener at all: every send queues instead of flushing immediately.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = ReconnectConfig::default();
    config.send_queue_capacity = 2;
    config.connect_timeout = Duration::from_millis(50);
    config.initial_delay = Duration::from_secs(5); // stay Disconnected/Connecting long enough to fill the queue
    let transport = ReconnectingWsTransport::connect(format!("ws://{addr}"), config);

    for _ in 0..2 {
        let _ = transport.send(json!({"n": 1})).await;
    }
    let err = transport.send(json!({"n": 2})).await.unwrap_err();
    match err {
        CallError::Transport(TransportError::QueueFull { .. }) => {}
        other => panic!("expected QueueFull, got {other:?}"),
    }
}

struct AlwaysFails;
#[async_trait]
impl LocalTarget for AlwaysFails {
    fn resolve_namespace(&self, _segment: &str) -> Option<Arc<dyn LocalTarget>> {
        None
    }
    async fn call_method(&self, _segment: &str, _args: Vec<Value>) -> Option<Result<Value, RpcError>> {
        Some(Err(RpcError::unknown_error("primary down")))
    }
}

struct AlwaysSucceeds;
#[async_trait]
impl LocalTarget for AlwaysSucceeds {
    fn resolve_namespace(&self, _segment: &str) -> Option<Arc<dyn LocalTarget>> {
        None
    }
    async fn call_method(&self, _segment: &str, args: Vec<Value>) -> Option<Result<Value, RpcError>> {
        Some(Ok(json!({"handled_by": "fallback", "args": args})))
    }
}

#[tokio::test]
async fn composite_transport_falls_through_to_fallback_child() {
    let primary: Box<dyn Transport> = Box::new(LocalTransport::new(Arc::new(AlwaysFails)));
    let fallback: Box<dyn Transport> = Box::new(LocalTransport::new(Arc::new(AlwaysSucceeds)));
    let composite = CompositeTransport::new(vec![primary, fallback]);

    let result = composite.call("ping", vec![]).await.unwrap();
    assert_eq!(result["handled_by"], "fallback");
}

struct Echo;
#[async_trait]
impl LocalTarget for Echo {
    fn resolve_namespace(&self, _segment: &str) -> Option<Arc<dyn LocalTarget>> {
        None
    }
    async fn call_method(&self, segment: &str, args: Vec<Value>) -> Option<Result<Value, RpcError>> {
        if segment == "echo" {
            Some(Ok(json!({"args": args})))
        } else {
            None
        }
    }
}

#[tokio::test]
async fn server_dispatch_rejects_missing_bearer_token() {
    let target: Arc<dyn Transport> = Arc::new(LocalTransport::new(Arc::new(Echo)));
    let auth = bearer_auth(|token| async move { (token == "good").then(|| json!({"user": "alice"})) });
    let app = RpcHandler::new(target, auth).into_router();

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(json!({"path": "echo", "args": []}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn server_dispatch_admits_valid_bearer_token() {
    let target: Arc<dyn Transport> = Arc::new(LocalTransport::new(Arc::new(Echo)));
    let auth = bearer_auth(|token| async move { (token == "good").then(|| json!({"user": "alice"})) });
    let app = RpcHandler::new(target, auth).into_router();

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .header("authorization", "Bearer good")
                .body(axum::body::Body::from(json!({"path": "echo", "args": [1, 2]}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn server_without_auth_admits_every_caller() {
    let target: Arc<dyn Transport> = Arc::new(LocalTransport::new(Arc::new(Echo)));
    let app = RpcHandler::new(target, no_auth()).into_router();

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(json!({"path": "echo", "args": []}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn registered_server_target_dispatches_nested_method() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let users = ServerTargetBuilder::new()
        .method("find", move |args| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"args": args}))
            }
        })
        .build();
    let root = ServerTargetBuilder::new().namespace("users", users).build();
    let target: Arc<dyn Transport> = Arc::new(LocalTransport::new(Arc::new(root)));

    let result = target.call("users.find", vec![json!({"id": 1})]).await.unwrap();
    assert_eq!(result["args"][0]["id"], 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn auth_provider_with_no_token_returns_none() {
    let auth = StaticAuth::none();
    let token: AuthToken = auth.fetch().await.unwrap();
    assert!(token.is_none());
}
