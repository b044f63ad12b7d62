//! Server-side auth middleware: extracts a bearer token from the
//! `Authorization` header or a `?token=` query parameter and hands it to a
//! host-supplied `verify` function.
//!
//! Grounded on the teacher's `ipc/auth.rs` bearer validation, generalized
//! from "compare against one fixed local token" to "verify against
//! whatever context the host's `verify` function returns".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Outcome of authorizing one request: either a context value threaded
/// through to the dispatched call, or outright rejection.
pub type AuthContext = Value;

#[async_trait]
pub trait ServerAuth: Send + Sync {
    /// `None` means unauthorized (401); `Some(context)` admits the request.
    async fn authorize(&self, bearer_token: Option<&str>) -> Option<AuthContext>;
}

/// Admits every request with an empty context — no credentials checked.
pub struct NoAuth;

#[async_trait]
impl ServerAuth for NoAuth {
    async fn authorize(&self, _bearer_token: Option<&str>) -> Option<AuthContext> {
        Some(Value::Null)
    }
}

pub fn no_auth() -> Arc<dyn ServerAuth> {
    Arc::new(NoAuth)
}

type VerifyFn =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<AuthContext>> + Send>> + Send + Sync>;

/// Verifies the extracted bearer token with a host-supplied function.
pub struct BearerAuth {
    verify: VerifyFn,
}

impl BearerAuth {
    pub fn new<F, Fut>(verify: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<AuthContext>> + Send + 'static,
    {
        Self {
            verify: Arc::new(move |token| Box::pin(verify(token))),
        }
    }
}

#[async_trait]
impl ServerAuth for BearerAuth {
    async fn authorize(&self, bearer_token: Option<&str>) -> Option<AuthContext> {
        let token = bearer_token?;
        (self.verify)(token.to_string()).await
    }
}

pub fn bearer_auth<F, Fut>(verify: F) -> Arc<dyn ServerAuth>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<AuthContext>> + Send + 'static,
{
    Arc::new(BearerAuth::new(verify))
}

/// Extracts a bearer token from `Authorization: Bearer <token>`, falling
/// back to a `?token=...` query parameter.
pub fn extract_bearer_token(authorization_header: Option<&str>, query: &str) -> Option<String> {
    if let Some(header) = authorization_header {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_string());
        }
    }
    None
}

/// Constant-time comparison — avoids leaking token length-prefix matches
/// through early-exit `==` timing.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
