//! Reconnecting WebSocket transport: the core of the crate. A cheaply
//! `Clone`-able handle backed by a single actor task that owns the socket,
//! the bounded queues, the pending-request map, and every timer.

pub mod config;
pub mod correlation;
pub mod state;

mod actor;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

pub use config::{QueueFullBehavior, ReconnectConfig};
pub use state::ConnectionState;

use crate::auth::AuthProvider;
use crate::error::{CallError, TransportError};
use crate::method_path::split_for_invalid_path;
use crate::transport::Transport;

use actor::{Actor, Op};

/// Handle to a reconnecting WebSocket connection. Cloning shares the same
/// underlying actor and connection.
#[derive(Clone)]
pub struct ReconnectingWsTransport {
    op_tx: mpsc::Sender<Op>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ReconnectingWsTransport {
    pub fn connect(url: impl Into<String>, config: ReconnectConfig) -> Self {
        Self::connect_with_auth(url, config, None)
    }

    pub fn connect_with_auth(
        url: impl Into<String>,
        config: ReconnectConfig,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Self {
        let (op_tx, op_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = Actor::new(url.into(), config, auth, op_tx.clone(), op_rx, state_tx);
        tokio::spawn(actor.run());

        Self { op_tx, state_rx }
    }

    /// Current connection state. Never polls — backed by a `watch` channel
    /// updated by the actor on every transition (resolves the §9 Open
    /// Question about the 50ms polling loop).
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Resolves the next time the state changes.
    pub async fn state_changed(&mut self) -> ConnectionState {
        let _ = self.state_rx.changed().await;
        *self.state_rx.borrow()
    }

    /// Send a raw application message, bypassing request/response
    /// correlation. Subject to the send-queue overflow policy while
    /// disconnected.
    pub async fn send(&self, message: Value) -> Result<(), CallError> {
        let (reply, rx) = oneshot::channel();
        self.op_tx
            .send(Op::Send { message, reply })
            .await
            .map_err(|_| CallError::from(TransportError::closed()))?;
        rx.await.map_err(|_| CallError::from(TransportError::closed()))?
    }

    /// Yield the next inbound application message (never a ping/pong/auth
    /// control frame, never a correlated call response).
    pub async fn receive(&self) -> Result<Value, CallError> {
        let (reply, rx) = oneshot::channel();
        self.op_tx
            .send(Op::Receive { reply })
            .await
            .map_err(|_| CallError::from(TransportError::closed()))?;
        rx.await.map_err(|_| CallError::from(TransportError::closed()))?
    }

    /// Equivalent to `close()`; idempotent.
    pub async fn abort(&self, reason: impl Into<String>) {
        let _ = self.op_tx.send(Op::Abort { reason: reason.into() }).await;
    }
}

#[async_trait]
impl Transport for ReconnectingWsTransport {
    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, CallError> {
        split_for_invalid_path(path).map_err(CallError::from)?;

        let (reply, rx) = oneshot::channel();
        self.op_tx
            .send(Op::Call {
                path: path.to_string(),
                args,
                reply,
            })
            .await
            .map_err(|_| CallError::from(TransportError::closed()))?;

        rx.await.map_err(|_| CallError::from(TransportError::closed()))?
    }

    async fn close(&self) {
        let _ = self.op_tx.send(Op::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    async fn echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(text) = msg {
                        let value: Value = serde_json::from_str(&text).unwrap();
                        if value.get("type").and_then(Value::as_str) == Some("ping") {
                            let pong = serde_json::json!({"type": "pong"});
                            let _ = ws.send(Message::Text(pong.to_string())).await;
                            continue;
                        }
                        if let Some(id) = value.get("id") {
                            let response = serde_json::json!({"id": id, "result": {"echo": value.get("path")}});
                            let _ = ws.send(Message::Text(response.to_string())).await;
                        }
                    }
                }
            }
        });
        (format!("ws://{addr}"), handle)
    }

    #[tokio::test]
    async fn calls_round_trip_through_echo_server() {
        let (url, _server) = echo_server().await;
        let transport = ReconnectingWsTransport::connect(url, ReconnectConfig::default());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = transport.call("a.b.c", vec![]).await.unwrap();
        assert_eq!(result["echo"], "a.b.c");
    }

    #[tokio::test]
    async fn close_rejects_pending_and_future_calls() {
        let (url, _server) = echo_server().await;
        let transport = ReconnectingWsTransport::connect(url, ReconnectConfig::default());
        tokio::time::sleep(Duration::from_millis(100)).await;

        transport.close().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = transport.call("a.b", vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }
}
