//! Request/response correlation: a monotone id counter and a map from id to
//! the caller waiting on it. Owned exclusively by the actor task — no
//! locking needed since nothing else touches it.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::CallError;

pub type PendingReply = oneshot::Sender<Result<Value, CallError>>;

#[derive(Default)]
pub struct PendingRequests {
    next_id: u64,
    inner: HashMap<u64, PendingReply>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh id and register the caller waiting on it.
    pub fn insert(&mut self, reply: PendingReply) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.inner.insert(id, reply);
        id
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingReply> {
        self.inner.remove(&id)
    }

    /// Drain every pending request, completing each with `err_for`. Used when
    /// the connection drops and in-flight calls must be unblocked.
    pub fn fail_all(&mut self, make_err: impl Fn() -> CallError) {
        for (_, reply) in self.inner.drain() {
            let _ = reply.send(Err(make_err()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
