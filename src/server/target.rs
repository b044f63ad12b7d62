//! Server-side target wrapper (§4.8): a builder a host populates explicitly
//! with named methods and nested sub-targets, in place of the reflection
//! the original object-graph walker relied on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;
use crate::transport::local::LocalTarget;

pub type MethodFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
pub type MethodFn = Arc<dyn Fn(Vec<Value>) -> MethodFuture + Send + Sync>;

/// Names rejected at registration time rather than call time — mirrors the
/// original's skip-set-and-underscore-prefix filter, applied up front
/// instead of during traversal.
const RESERVED_NAMES: &[&str] = &["constructor", "toString", "valueOf", "toJSON"];

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("method or namespace name must not be empty".into());
    }
    if name.starts_with('_') {
        return Err(format!("'{name}' starts with '_' and cannot be registered"));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(format!("'{name}' is a reserved name"));
    }
    Ok(())
}

/// A node built up by [`ServerTargetBuilder`]. Implements [`LocalTarget`] so
/// it plugs straight into the local binding transport, and is equally
/// usable as the dispatch root behind the HTTP/WS server (§4.7).
pub struct ServerTarget {
    methods: HashMap<String, MethodFn>,
    namespaces: HashMap<String, Arc<ServerTarget>>,
}

pub struct ServerTargetBuilder {
    methods: HashMap<String, MethodFn>,
    namespaces: HashMap<String, Arc<ServerTarget>>,
}

impl ServerTargetBuilder {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            namespaces: HashMap::new(),
        }
    }

    /// Register a method, callable as the final segment of a dotted path.
    ///
    /// # Panics
    /// Panics if `name` is reserved or already registered — this is a
    /// programming error caught at startup, not a runtime condition.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let name = name.into();
        validate_name(&name).unwrap_or_else(|e| panic!("{e}"));
        if self.methods.contains_key(&name) || self.namespaces.contains_key(&name) {
            panic!("'{name}' is already registered on this target");
        }
        self.methods.insert(name, Arc::new(move |args| Box::pin(f(args))));
        self
    }

    /// Register a nested namespace, reached by an intermediate path segment.
    ///
    /// # Panics
    /// Panics if `name` is reserved or already registered.
    pub fn namespace(mut self, name: impl Into<String>, target: ServerTarget) -> Self {
        let name = name.into();
        validate_name(&name).unwrap_or_else(|e| panic!("{e}"));
        if self.methods.contains_key(&name) || self.namespaces.contains_key(&name) {
            panic!("'{name}' is already registered on this target");
        }
        self.namespaces.insert(name, Arc::new(target));
        self
    }

    pub fn build(self) -> ServerTarget {
        ServerTarget {
            methods: self.methods,
            namespaces: self.namespaces,
        }
    }
}

impl Default for ServerTargetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalTarget for ServerTarget {
    fn resolve_namespace(&self, segment: &str) -> Option<Arc<dyn LocalTarget>> {
        self.namespaces
            .get(segment)
            .map(|t| t.clone() as Arc<dyn LocalTarget>)
    }

    async fn call_method(&self, segment: &str, args: Vec<Value>) -> Option<Result<Value, RpcError>> {
        let method = self.methods.get(segment)?.clone();
        Some(method(args).await)
    }
}
