//! Dotted-path client proxy: builds up a method path, then issues one
//! typed `call()` through whatever `Transport` backs it.
//!
//! Rust has no dynamic attribute access, so the JS-style "chained property
//! access returns another proxy" becomes an explicit `.path("a.b.c")`
//! builder (§2.1) rather than operator-overload magic.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::error::{CallError, RpcError};
use crate::transport::Transport;

type BoxedFactory =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Arc<dyn Transport>> + Send>> + Send>;

enum Backing {
    Transport(Arc<dyn Transport>),
    Factory(std::sync::Mutex<Option<BoxedFactory>>),
}

/// Root handle: either wraps an already-connected transport, or a factory
/// invoked exactly once on first use (§4.6).
pub struct RpcProxy {
    backing: Backing,
    resolved: OnceCell<Arc<dyn Transport>>,
}

impl RpcProxy {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            backing: Backing::Transport(transport),
            resolved: OnceCell::new(),
        }
    }

    /// Build from a factory that is invoked exactly once, lazily, the first
    /// time a call actually needs the transport.
    pub fn from_factory<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Arc<dyn Transport>> + Send + 'static,
    {
        let boxed: BoxedFactory = Box::new(move || Box::pin(factory()));
        Self {
            backing: Backing::Factory(std::sync::Mutex::new(Some(boxed))),
            resolved: OnceCell::new(),
        }
    }

    /// Begin a dotted path from the root.
    pub fn path(self: &Arc<Self>, segment: impl Into<String>) -> PathBuilder {
        PathBuilder {
            root: self.clone(),
            path: segment.into(),
        }
    }

    async fn transport(&self) -> Arc<dyn Transport> {
        self.resolved
            .get_or_init(|| async {
                match &self.backing {
                    Backing::Transport(t) => t.clone(),
                    Backing::Factory(slot) => {
                        let factory = slot
                            .lock()
                            .expect("proxy factory mutex poisoned")
                            .take()
                            .expect("proxy factory invoked more than once");
                        factory().await
                    }
                }
            })
            .await
            .clone()
    }
}

/// Accumulates dotted-path segments before a typed call is issued.
pub struct PathBuilder {
    root: Arc<RpcProxy>,
    path: String,
}

impl PathBuilder {
    pub fn path(mut self, segment: impl AsRef<str>) -> Self {
        self.path.push('.');
        self.path.push_str(segment.as_ref());
        self
    }

    /// Issue the call with a single serializable argument, decoding the
    /// result as `Resp`.
    pub async fn call<Req, Resp>(self, arg: Req) -> Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.call_with_args(vec![serde_json::to_value(arg).map_err(|e| {
            CallError::from(RpcError::parse_error(format!("failed to encode args: {e}")))
        })?])
        .await
    }

    /// Issue the call with zero or more positional arguments already
    /// encoded as JSON values.
    pub async fn call_with_args<Resp>(self, args: Vec<serde_json::Value>) -> Result<Resp, CallError>
    where
        Resp: DeserializeOwned,
    {
        let transport = self.root.transport().await;
        let value = transport.call(&self.path, args).await?;
        serde_json::from_value(value)
            .map_err(|e| CallError::from(RpcError::parse_error(format!("failed to decode result: {e}"))))
    }
}
