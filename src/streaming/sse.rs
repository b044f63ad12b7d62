//! SSE stream consumer: parses the on-wire Server-Sent Events frame set from
//! a remote byte stream and exposes it as a [`futures::Stream`].
//!
//! Grounded on the teacher's `rest/sse.rs` `stream::unfold` usage (there, a
//! producer; here, the mirror-image consumer) and on the `Subscription:
//! Stream` pattern from the pack's reconnecting-rpc-client file.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

use crate::error::RpcError;
use crate::transport::websocket::QueueFullBehavior;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<Duration>,
}

/// Incrementally parses SSE framing out of arbitrary byte chunks. One
/// instance per connection; call [`Parser::push`] with each chunk and drain
/// completed events with [`Parser::pop_event`].
#[derive(Default)]
struct Parser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<Duration>,
    completed: VecDeque<SseEvent>,
}

impl Parser {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        loop {
            let Some(newline_at) = self.buffer.find('\n') else {
                break;
            };
            let line = self.buffer[..newline_at].trim_end_matches('\r').to_string();
            self.buffer.drain(..=newline_at);
            self.consume_line(&line);
        }
    }

    fn consume_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch_event();
            return;
        }
        if line.starts_with(':') {
            return; // comment line
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => {
                if !value.contains('\0') {
                    self.id = Some(value.to_string());
                }
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
    }

    fn dispatch_event(&mut self) {
        if self.data_lines.is_empty() && self.event.is_none() {
            return;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            id: self.id.clone(),
            retry: self.retry,
        };
        self.data_lines.clear();
        self.completed.push_back(event);
    }

    fn pop_event(&mut self) -> Option<SseEvent> {
        self.completed.pop_front()
    }

    fn last_event_id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Re-opens the byte stream, given the last-seen event id (for
/// `Last-Event-ID` idle-reconnect).
pub type ReopenFn = Box<
    dyn Fn(Option<String>) -> Pin<Box<dyn Future<Output = Result<BoxStream<'static, std::io::Result<Bytes>>, RpcError>> + Send>>
        + Send,
>;

/// A client-side SSE consumer. Implements [`Stream`], so `.map`/`.filter`/
/// `.take` are available via [`futures_util::StreamExt`] for free.
pub struct SseStream {
    inner: Option<BoxStream<'static, std::io::Result<Bytes>>>,
    reopen: Option<ReopenFn>,
    parser: Parser,
    buffer: VecDeque<Result<SseEvent, RpcError>>,
    max_buffer: usize,
    overflow: QueueFullBehavior,
    reconnecting: Option<Pin<Box<dyn Future<Output = Result<BoxStream<'static, std::io::Result<Bytes>>, RpcError>> + Send>>>,
}

impl SseStream {
    pub fn new(source: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        Self {
            inner: Some(source),
            reopen: None,
            parser: Parser::default(),
            buffer: VecDeque::new(),
            max_buffer: 1000,
            overflow: QueueFullBehavior::DropOldest,
            reconnecting: None,
        }
    }

    pub fn with_idle_reconnect(mut self, reopen: ReopenFn) -> Self {
        self.reopen = Some(reopen);
        self
    }

    pub fn with_buffer_limit(mut self, max: usize) -> Self {
        self.max_buffer = max;
        self
    }

    fn push_buffered(&mut self, item: Result<SseEvent, RpcError>) {
        if self.buffer.len() >= self.max_buffer {
            match self.overflow {
                QueueFullBehavior::DropOldest => {
                    self.buffer.pop_front();
                }
                QueueFullBehavior::DropNewest => return,
                QueueFullBehavior::Error => {
                    self.buffer.pop_front();
                }
            }
        }
        self.buffer.push_back(item);
    }
}

impl Stream for SseStream {
    type Item = Result<SseEvent, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(buffered) = self.buffer.pop_front() {
            return Poll::Ready(Some(buffered));
        }

        loop {
            if let Some(mut reconnect_fut) = self.reconnecting.take() {
                match reconnect_fut.as_mut().poll(cx) {
                    Poll::Ready(Ok(stream)) => {
                        self.inner = Some(stream);
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                    Poll::Pending => {
                        self.reconnecting = Some(reconnect_fut);
                        return Poll::Pending;
                    }
                }
            }

            let Some(inner) = self.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.parser.push(&chunk);
                    // A chunk can complete more than one event; route all of
                    // them through the bounded buffer so the overflow policy
                    // applies and none stall behind the next read.
                    while let Some(event) = self.parser.pop_event() {
                        self.push_buffered(Ok(event));
                    }
                    if let Some(buffered) = self.buffer.pop_front() {
                        return Poll::Ready(Some(buffered));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(RpcError::protocol_error(format!(
                        "sse read error: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    self.inner = None;
                    if let Some(reopen) = self.reopen.as_ref() {
                        let last_id = self.parser.last_event_id().map(str::to_string);
                        self.reconnecting = Some((reopen)(last_id));
                        continue;
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
