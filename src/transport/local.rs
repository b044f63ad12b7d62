//! Local binding transport: synchronous (in the sense of "no network hop")
//! traversal of a user-supplied object graph, driven by a dotted path.
//!
//! Rust has no reflection over arbitrary values, so "object graph" is a
//! small trait (`LocalTarget`) the host implements rather than an arbitrary
//! struct walked by field name (§4.4 Rust note).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CallError, RpcError};
use crate::transport::Transport;

/// A node in the locally-bound object graph. Intermediate segments must
/// resolve to another `LocalTarget` (`UnknownNamespace` otherwise); the
/// final segment must be callable (`UnknownMethod` otherwise).
#[async_trait]
pub trait LocalTarget: Send + Sync {
    /// Resolve one dotted segment to a nested target, if `segment` names a
    /// namespace rather than a method.
    fn resolve_namespace(&self, segment: &str) -> Option<Arc<dyn LocalTarget>>;

    /// Invoke `segment` as a method with the given positional args.
    /// Returns `None` if `segment` does not name a method on this target.
    async fn call_method(&self, segment: &str, args: Vec<Value>) -> Option<Result<Value, RpcError>>;
}

pub struct LocalTransport {
    root: Arc<dyn LocalTarget>,
}

impl LocalTransport {
    pub fn new(root: Arc<dyn LocalTarget>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, CallError> {
        // Unlike the client-side transports, an empty segment here is not a
        // distinct "invalid path" error — it simply fails to resolve as a
        // namespace or method, which is the binding transport's own
        // vocabulary (§8 invariant 5).
        let segments: Vec<&str> = path.split('.').collect();

        let mut current = self.root.clone();
        for segment in &segments[..segments.len() - 1] {
            current = match current.resolve_namespace(segment) {
                Some(next) => next,
                None => return Err(RpcError::unknown_namespace(segment).into()),
            };
        }

        let method = segments[segments.len() - 1];
        match current.call_method(method, args).await {
            Some(result) => result.map_err(CallError::from),
            None => Err(RpcError::unknown_method(method).into()),
        }
    }

    async fn close(&self) {}
}
