//! The actor task: sole owner of the socket, the queues, and the pending-
//! request map. Everything else talks to it over channels.
//!
//! Grounded on the teacher's `relay_loop`/`handle_inbound`/`handle_outbound`
//! `tokio::select!` split and on the pack's reconnecting-rpc-client `Op`
//! enum — generalized from "one fixed protocol" to "arbitrary dotted-path
//! calls plus raw send/receive".

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::error::{CallError, RpcError, TransportError};

use super::config::{QueueFullBehavior, ReconnectConfig};
use super::correlation::PendingRequests;
use super::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) enum Op {
    Call {
        path: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Value, CallError>>,
    },
    Send {
        message: Value,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Receive {
        reply: oneshot::Sender<Result<Value, CallError>>,
    },
    Abort {
        reason: String,
    },
    /// Self-scheduled: a per-call deadline timer firing. Not part of the
    /// public handle surface.
    Timeout {
        id: u64,
    },
    Close,
}

pub(crate) struct Actor {
    url: String,
    config: ReconnectConfig,
    auth: Option<Arc<dyn AuthProvider>>,
    op_tx: mpsc::Sender<Op>,
    op_rx: mpsc::Receiver<Op>,
    state_tx: watch::Sender<ConnectionState>,

    pending: PendingRequests,
    send_queue: VecDeque<Value>,
    receive_queue: VecDeque<Value>,
    receive_waiters: VecDeque<oneshot::Sender<Result<Value, CallError>>>,
    reconnect_attempts: u32,
}

impl Actor {
    pub(crate) fn new(
        url: String,
        config: ReconnectConfig,
        auth: Option<Arc<dyn AuthProvider>>,
        op_tx: mpsc::Sender<Op>,
        op_rx: mpsc::Receiver<Op>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            url,
            config,
            auth,
            op_tx,
            op_rx,
            state_tx,
            pending: PendingRequests::new(),
            send_queue: VecDeque::new(),
            receive_queue: VecDeque::new(),
            receive_waiters: VecDeque::new(),
            reconnect_attempts: 0,
        }
    }

    /// Arms the per-call deadline timer for `id` (§4.2): fires `Op::Timeout`
    /// back into this actor's own queue after `request_timeout`. Dropping
    /// the pending entry before it fires (normal resolution, or the
    /// transport closing) makes the eventual `Op::Timeout` a harmless no-op.
    fn arm_deadline(&self, id: u64) {
        let tx = self.op_tx.clone();
        let timeout = self.config.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Op::Timeout { id }).await;
        });
    }

    fn handle_timeout(&mut self, id: u64) {
        if let Some(reply) = self.pending.remove(id) {
            let _ = reply.send(Err(TransportError::request_timeout(self.config.request_timeout).into()));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    pub(crate) async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.connect_once().await {
                Ok(socket) => {
                    self.reconnect_attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    let outcome = self.drive_connection(socket).await;
                    if matches!(outcome, DriveOutcome::ExplicitClose) {
                        self.finish_close().await;
                        return;
                    }
                }
                Err(ConnectOutcome::Cancelled) => {
                    // close()/abort() arrived while connecting or authing.
                    self.fail_and_close(TransportError::connection_lost()).await;
                    return;
                }
                Err(ConnectOutcome::Failed(e)) => {
                    warn!("ws transport: connect failed: {e}");
                    if !e.is_retryable() {
                        self.fail_and_close(e).await;
                        return;
                    }
                }
            }

            if !self.config.auto_reconnect {
                self.fail_everything(TransportError::connection_lost());
                self.set_state(ConnectionState::Closed);
                return;
            }

            self.reconnect_attempts += 1;
            if let Some(max) = self.config.max_attempts {
                if self.reconnect_attempts > max {
                    self.fail_everything(TransportError::reconnect_failed(
                        self.reconnect_attempts - 1,
                    ));
                    self.set_state(ConnectionState::Closed);
                    return;
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            let delay = self.config.delay_for_attempt(self.reconnect_attempts);
            debug!(attempt = self.reconnect_attempts, delay_ms = delay.as_millis() as u64, "ws transport: reconnecting");

            // A single timer governs the whole wait: offline ops arriving in
            // the meantime are handled inline and must never reset or skip it.
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    maybe_op = self.op_rx.recv() => {
                        match maybe_op {
                            Some(Op::Close) | Some(Op::Abort { .. }) | None => {
                                self.finish_close().await;
                                return;
                            }
                            Some(Op::Timeout { id }) => self.handle_timeout(id),
                            Some(op) => self.handle_offline_op(op),
                        }
                    }
                }
            }
        }
    }

    /// Connects and, if configured, authenticates — cancellable by a
    /// `Close`/`Abort` arriving on `op_rx` while either step is in flight
    /// (§4.1, §9): the in-progress attempt is abandoned rather than awaited
    /// to completion.
    async fn connect_once(&mut self) -> Result<WsStream, ConnectOutcome> {
        let attempt = Self::connect_and_auth(self.url.clone(), self.config.clone(), self.auth.clone());
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                result = &mut attempt => return result.map_err(ConnectOutcome::Failed),
                maybe_op = self.op_rx.recv() => {
                    match maybe_op {
                        Some(Op::Close) | Some(Op::Abort { .. }) | None => return Err(ConnectOutcome::Cancelled),
                        Some(Op::Timeout { id }) => self.handle_timeout(id),
                        Some(op) => self.handle_offline_op(op),
                    }
                }
            }
        }
    }

    async fn connect_and_auth(
        url: String,
        config: ReconnectConfig,
        auth: Option<Arc<dyn AuthProvider>>,
    ) -> Result<WsStream, TransportError> {
        let (ws_url, is_secure) = normalize_ws_url(&url)?;

        let connect_fut = tokio_tungstenite::connect_async(&ws_url);
        let (mut socket, _response) = tokio::time::timeout(config.connect_timeout, connect_fut)
            .await
            .map_err(|_| TransportError::connection_timeout(config.connect_timeout))?
            .map_err(|e| TransportError::connection_failed(e.to_string()))?;

        if let Some(auth) = &auth {
            let token = auth.fetch().await?;
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                if !is_secure && !config.allow_insecure_auth {
                    let _ = socket
                        .close(Some(CloseFrame {
                            code: 4001u16.into(),
                            reason: "insecure auth refused".into(),
                        }))
                        .await;
                    return Err(TransportError::insecure_connection());
                }
                let envelope = serde_json::json!({"type": "auth", "token": token});
                socket
                    .send(Message::Text(envelope.to_string()))
                    .await
                    .map_err(|e| TransportError::connection_failed(e.to_string()))?;
            }
        }

        info!("ws transport: connected to {ws_url}");
        Ok(socket)
    }

    /// Runs one socket generation: heartbeat, inbound dispatch, outbound
    /// flush and further sends, and op handling, until the socket closes or
    /// an explicit close/abort is requested.
    async fn drive_connection(&mut self, mut socket: WsStream) -> DriveOutcome {
        self.flush_send_queue(&mut socket).await;

        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeat_pending = false;
        let mut last_pong_at = tokio::time::Instant::now();
        let heartbeat_enabled = !self.config.heartbeat_interval.is_zero();

        loop {
            tokio::select! {
                biased;

                maybe_op = self.op_rx.recv() => {
                    match maybe_op {
                        None | Some(Op::Close) => return DriveOutcome::ExplicitClose,
                        Some(Op::Abort { reason }) => {
                            debug!("ws transport: aborted: {reason}");
                            let _ = socket.close(None).await;
                            return DriveOutcome::ExplicitClose;
                        }
                        Some(Op::Timeout { id }) => self.handle_timeout(id),
                        Some(op) => self.handle_online_op(op, &mut socket).await,
                    }
                }

                inbound = socket.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_inbound_text(&text, &mut heartbeat_pending, &mut last_pong_at);
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            return DriveOutcome::SocketClosed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("ws transport: read error: {e}");
                            return DriveOutcome::SocketClosed;
                        }
                    }
                }

                _ = heartbeat_tick.tick(), if heartbeat_enabled => {
                    if heartbeat_pending
                        && last_pong_at.elapsed() > self.config.heartbeat_timeout + self.config.heartbeat_interval
                    {
                        warn!("ws transport: heartbeat timeout");
                        let _ = socket
                            .close(Some(CloseFrame { code: 4002u16.into(), reason: "heartbeat timeout".into() }))
                            .await;
                        return DriveOutcome::SocketClosed;
                    }
                    let ping = serde_json::json!({"type": "ping", "t": now_millis()});
                    if socket.send(Message::Text(ping.to_string())).await.is_err() {
                        return DriveOutcome::SocketClosed;
                    }
                    heartbeat_pending = true;
                }
            }
        }
    }

    fn handle_inbound_text(
        &mut self,
        text: &str,
        heartbeat_pending: &mut bool,
        last_pong_at: &mut tokio::time::Instant,
    ) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("ws transport: unparseable inbound frame: {e}");
                return;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("pong") {
            *heartbeat_pending = false;
            *last_pong_at = tokio::time::Instant::now();
            return;
        }

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(reply) = self.pending.remove(id) {
                let outcome = match value.get("error") {
                    Some(err) => Err(CallError::from(decode_rpc_error(err))),
                    None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                };
                let _ = reply.send(outcome);
                return;
            }
        }

        self.deliver_inbound(value);
    }

    fn deliver_inbound(&mut self, value: Value) {
        if let Some(waiter) = self.receive_waiters.pop_front() {
            let _ = waiter.send(Ok(value));
            return;
        }

        if self.receive_queue.len() >= self.config.receive_queue_capacity {
            match self.config.queue_full_behavior {
                QueueFullBehavior::Error => {
                    warn!("ws transport: receive queue full, dropping inbound message");
                    return;
                }
                QueueFullBehavior::DropOldest => {
                    self.receive_queue.pop_front();
                }
                QueueFullBehavior::DropNewest => {
                    return;
                }
            }
        }
        self.receive_queue.push_back(value);
    }

    async fn handle_online_op(&mut self, op: Op, socket: &mut WsStream) {
        match op {
            Op::Call { path, args, reply } => {
                let id = self.pending.insert(reply);
                self.arm_deadline(id);
                let envelope = serde_json::json!({"id": id, "path": path, "args": args});
                if let Err(e) = socket.send(Message::Text(envelope.to_string())).await {
                    if let Some(reply) = self.pending.remove(id) {
                        let _ = reply.send(Err(TransportError::connection_failed(e.to_string()).into()));
                    }
                }
            }
            Op::Send { message, reply } => {
                let outcome = socket
                    .send(Message::Text(message.to_string()))
                    .await
                    .map_err(|e| CallError::from(TransportError::connection_failed(e.to_string())));
                let _ = reply.send(outcome);
            }
            Op::Receive { reply } => {
                if let Some(value) = self.receive_queue.pop_front() {
                    let _ = reply.send(Ok(value));
                } else {
                    self.receive_waiters.push_back(reply);
                }
            }
            Op::Abort { .. } | Op::Close => unreachable!("handled by caller before dispatch"),
        }
    }

    /// Same call surface while disconnected/reconnecting: calls and sends
    /// queue (subject to overflow policy); receive serves from the buffer
    /// or waits.
    fn handle_offline_op(&mut self, op: Op) {
        match op {
            Op::Call { path, args, reply } => {
                let id = self.pending.insert(reply);
                self.arm_deadline(id);
                let envelope = serde_json::json!({"id": id, "path": path, "args": args});
                if let Err(e) = self.enqueue_send(envelope) {
                    // Queue refused the message outright (`error` policy); the
                    // deadline timer armed above would eventually time this
                    // call out regardless, but failing fast is more useful.
                    if let Some(reply) = self.pending.remove(id) {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Op::Send { message, reply } => {
                let queued = self.enqueue_send(message);
                let _ = reply.send(queued);
            }
            Op::Receive { reply } => {
                if let Some(value) = self.receive_queue.pop_front() {
                    let _ = reply.send(Ok(value));
                } else {
                    self.receive_waiters.push_back(reply);
                }
            }
            Op::Abort { .. } | Op::Close => unreachable!("handled by caller before dispatch"),
        }
    }

    /// Returns `Ok(())` when the message was accepted onto the queue (it may
    /// still be silently dropped under `drop-newest`, which is also `Ok`).
    fn enqueue_send(&mut self, message: Value) -> Result<(), CallError> {
        if self.send_queue.len() >= self.config.send_queue_capacity {
            match self.config.queue_full_behavior {
                QueueFullBehavior::Error => {
                    return Err(TransportError::queue_full(
                        crate::error::QueueKind::Send,
                        self.config.send_queue_capacity,
                    )
                    .into());
                }
                QueueFullBehavior::DropOldest => {
                    self.send_queue.pop_front();
                }
                QueueFullBehavior::DropNewest => {
                    return Ok(());
                }
            }
        }
        self.send_queue.push_back(message);
        Ok(())
    }

    async fn flush_send_queue(&mut self, socket: &mut WsStream) {
        while let Some(message) = self.send_queue.pop_front() {
            if socket.send(Message::Text(message.to_string())).await.is_err() {
                self.send_queue.push_front(message);
                break;
            }
        }
    }

    fn fail_everything(&mut self, err: TransportError) {
        self.pending.fail_all(|| err.clone().into());
        for waiter in self.receive_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone().into()));
        }
    }

    async fn finish_close(&mut self) {
        self.fail_and_close(TransportError::closed()).await;
    }

    /// Terminal transition used both for an explicit close and for a
    /// non-retryable failure: rejects everything pending (and anything that
    /// arrived after the decision was made) with `err`, then goes `Closed`.
    async fn fail_and_close(&mut self, err: TransportError) {
        self.fail_everything(err.clone());
        self.set_state(ConnectionState::Closed);
        while let Ok(op) = self.op_rx.try_recv() {
            match op {
                Op::Call { reply, .. } => {
                    let _ = reply.send(Err(err.clone().into()));
                }
                Op::Send { reply, .. } => {
                    let _ = reply.send(Err(err.clone().into()));
                }
                Op::Receive { reply } => {
                    let _ = reply.send(Err(err.clone().into()));
                }
                Op::Abort { .. } | Op::Close | Op::Timeout { .. } => {}
            }
        }
    }
}

enum DriveOutcome {
    SocketClosed,
    ExplicitClose,
}

/// Outcome of a single connect+auth attempt, distinguishing a regular
/// failure (subject to the retry/backoff policy) from an attempt abandoned
/// because the caller closed or aborted while it was in flight.
enum ConnectOutcome {
    Failed(TransportError),
    Cancelled,
}

fn decode_rpc_error(value: &Value) -> RpcError {
    let code = value
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN_ERROR")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let mut err = RpcError::new(code, message);
    if let Some(data) = value.get("data") {
        err = err.with_data(data.clone());
    }
    err
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Substitutes `http`/`https` schemes for `ws`/`wss` (§6). Returns the
/// normalized URL and whether the resulting scheme is TLS-secured.
pub(crate) fn normalize_ws_url(raw: &str) -> Result<(String, bool), TransportError> {
    let mut parsed = url::Url::parse(raw)
        .map_err(|e| TransportError::connection_failed(format!("invalid url: {e}")))?;

    let secure = match parsed.scheme() {
        "ws" => false,
        "wss" => true,
        "http" => {
            parsed.set_scheme("ws").ok();
            false
        }
        "https" => {
            parsed.set_scheme("wss").ok();
            true
        }
        other => {
            return Err(TransportError::connection_failed(format!(
                "unsupported scheme: {other}"
            )))
        }
    };
    Ok((parsed.to_string(), secure))
}
