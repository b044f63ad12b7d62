//! WebSocket subscription streaming: `subscribe` → `ack` → `data*` →
//! `unsubscribe`, layered on top of a [`ReconnectingWsTransport`]'s raw
//! `send`/`receive` surface.
//!
//! Grounded on the pack's reconnecting-rpc-client `Subscription: Stream`
//! implementation, generalized from jsonrpsee's subscription envelope to
//! this crate's `{type, subscriptionId, ...}` wire shape.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream};
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};

use crate::error::RpcError;
use crate::transport::websocket::ReconnectingWsTransport;

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub filter: Option<Value>,
    pub start_from: Option<Value>,
    pub include_history: bool,
}

/// A bounded mailbox that evicts the oldest entry on overflow (the
/// `drop-oldest` policy, §4.9) instead of applying ordinary channel
/// backpressure.
struct OverflowBuffer<T> {
    queue: Mutex<VecDeque<Result<T, RpcError>>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl<T> OverflowBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    async fn push(&self, item: Result<T, RpcError>) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(item);
        drop(queue);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<Result<T, RpcError>> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(item) = queue.pop_front() {
                    return Some(item);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// A live subscription to one topic. Implements [`Stream`], so
/// `.map`/`.filter`/`.take` compose via [`futures_util::StreamExt`].
pub struct WsSubscription<T> {
    subscription_id: String,
    inner: BoxStream<'static, Result<T, RpcError>>,
}

impl<T> WsSubscription<T> {
    pub fn id(&self) -> &str {
        &self.subscription_id
    }
}

impl<T> Stream for WsSubscription<T> {
    type Item = Result<T, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Subscribe to `topic` over `transport`, awaiting the server's `ack`
/// before returning. Dropping the returned stream stops the background
/// pump but does not send `unsubscribe` — call [`unsubscribe`] explicitly
/// if the server expects one.
pub async fn subscribe<T>(
    transport: &ReconnectingWsTransport,
    topic: impl Into<String>,
    subscription_id: impl Into<String>,
    options: SubscribeOptions,
) -> Result<WsSubscription<T>, RpcError>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let subscription_id = subscription_id.into();
    let envelope = serde_json::json!({
        "type": "subscribe",
        "subscriptionId": subscription_id,
        "topic": topic.into(),
        "filter": options.filter,
        "startFrom": options.start_from,
        "includeHistory": options.include_history,
    });

    transport
        .send(envelope)
        .await
        .map_err(|e| RpcError::protocol_error(format!("failed to send subscribe: {e}")))?;

    loop {
        let message = transport
            .receive()
            .await
            .map_err(|e| RpcError::protocol_error(format!("subscription stream closed: {e}")))?;

        if message.get("type").and_then(Value::as_str) == Some("ack")
            && message.get("subscriptionId").and_then(Value::as_str) == Some(&subscription_id)
        {
            break;
        }
    }

    let buffer = Arc::new(OverflowBuffer::new(256));
    tokio::spawn(pump(transport.clone(), subscription_id.clone(), buffer.clone()));

    let inner = stream::unfold(buffer, |buffer| async move {
        buffer.pop().await.map(|item| (item, buffer))
    })
    .boxed();

    Ok(WsSubscription {
        subscription_id,
        inner,
    })
}

async fn pump<T>(
    transport: ReconnectingWsTransport,
    subscription_id: String,
    buffer: Arc<OverflowBuffer<T>>,
) where
    T: DeserializeOwned + Send + Sync + 'static,
{
    loop {
        let message = match transport.receive().await {
            Ok(m) => m,
            Err(_) => break,
        };

        if message.get("type").and_then(Value::as_str) != Some("data") {
            continue;
        }
        if message.get("subscriptionId").and_then(Value::as_str) != Some(&subscription_id) {
            continue;
        }

        let decoded = match message.get("data") {
            Some(data) => serde_json::from_value::<T>(data.clone())
                .map_err(|e| RpcError::parse_error(format!("failed to decode subscription data: {e}"))),
            None => Err(RpcError::protocol_error("data frame missing 'data' field")),
        };
        buffer.push(decoded).await;
    }
    buffer.close();
}

pub async fn unsubscribe(
    transport: &ReconnectingWsTransport,
    subscription_id: impl Into<String>,
) -> Result<(), RpcError> {
    let envelope = serde_json::json!({
        "type": "unsubscribe",
        "subscriptionId": subscription_id.into(),
    });
    transport
        .send(envelope)
        .await
        .map_err(|e| RpcError::protocol_error(format!("failed to send unsubscribe: {e}")))
}
