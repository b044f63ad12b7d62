//! The `Transport` abstraction: the single contract every carrier (HTTP
//! batch, local binding, composite, reconnecting WebSocket) implements.

pub mod composite;
pub mod http;
pub mod local;
pub mod websocket;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;

/// Uniform `call(path, args) -> value` contract, plus optional `close()`.
///
/// Implementors must not panic on malformed input — every failure mode is a
/// [`CallError`]. `close()` never fails (§7): it is infallible by signature.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invoke `path` with positional `args`, returning the decoded result.
    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, CallError>;

    /// Release any held resources (sockets, timers, pending requests).
    /// Idempotent; safe to call more than once.
    async fn close(&self);
}
