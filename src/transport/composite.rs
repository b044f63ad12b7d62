//! Composite transport: tries child transports in order, falling through to
//! the next on failure and surfacing the last child's error once all are
//! exhausted.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;
use crate::transport::Transport;

pub struct CompositeTransport {
    children: Vec<Box<dyn Transport>>,
}

impl CompositeTransport {
    pub fn new(children: Vec<Box<dyn Transport>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Transport for CompositeTransport {
    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let mut last_err = None;
        for child in &self.children {
            match child.call(path, args.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| crate::error::TransportError::closed().into()))
    }

    async fn close(&self) {
        for child in &self.children {
            child.close().await;
        }
    }
}
