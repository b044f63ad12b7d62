//! HTTP batch transport: stateless per-call semantics over a session object
//! lazily built from a host-supplied factory.
//!
//! The third-party batch-protocol library is out of scope (§1 non-goals);
//! it is abstracted behind [`SessionFactory`] per the REDESIGN FLAGS (§9),
//! so this transport depends only on the trait and a disposal hook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::auth::AuthProvider;
use crate::error::{CallError, RpcError};
use crate::method_path::split_for_invalid_path;
use crate::transport::Transport;

/// A single open call against a remote session, as the factory's opaque
/// library would expose it: navigate to `path`, invoke with `args`.
#[async_trait]
pub trait Session: Send + Sync {
    /// Returns `Ok(None)` if `path` does not resolve to a navigable target
    /// at all (maps to `InvalidPath`), and an opaque error from the
    /// underlying call otherwise (classified by [`RpcError::classify_http`]).
    async fn call(
        &self,
        path: &str,
        args: Vec<Value>,
        headers: &[(&str, String)],
    ) -> Result<Value, SessionCallError>;

    /// Release the session's resources. Invoked exactly once, on disposal.
    async fn dispose(&self);
}

/// An opaque failure from the underlying batch-protocol call, carrying
/// whatever the library gave us for classification.
pub struct SessionCallError {
    pub status: Option<u16>,
    pub message: String,
}

/// Builds a [`Session`] lazily, exactly once, shared across concurrent
/// callers (single-flight per §4.3 step 1).
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_http_session(&self) -> Result<Arc<dyn Session>, String>;
}

pub struct HttpTransport {
    factory: Arc<dyn SessionFactory>,
    auth: Option<Arc<dyn AuthProvider>>,
    timeout: Option<Duration>,
    session: OnceCell<Arc<dyn Session>>,
}

impl HttpTransport {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            auth: None,
            timeout: None,
            session: OnceCell::new(),
        }
    }

    /// Attach a real `Authorization: Bearer <token>` header to every call
    /// (resolution of the §9 Open Question — this is not a warning-only,
    /// do-nothing option).
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn session(&self) -> Result<Arc<dyn Session>, CallError> {
        self.session
            .get_or_try_init(|| async {
                self.factory
                    .open_http_session()
                    .await
                    .map_err(|e| CallError::from(crate::error::TransportError::connection_failed(e)))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, path: &str, args: Vec<Value>) -> Result<Value, CallError> {
        split_for_invalid_path(path).map_err(CallError::from)?;

        let session = self.session().await?;

        let mut header_owned = Vec::new();
        if let Some(auth) = &self.auth {
            if let Some(token) = auth.fetch().await.map_err(CallError::from)? {
                header_owned.push(("Authorization", format!("Bearer {token}")));
            }
        }
        let headers: Vec<(&str, String)> = header_owned.clone();

        let call_fut = session.call(path, args, &headers);

        let outcome = match self.timeout {
            Some(timeout) if !timeout.is_zero() => {
                match tokio::time::timeout(timeout, call_fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(
                            crate::error::TransportError::request_timeout(timeout).into(),
                        )
                    }
                }
            }
            _ => call_fut.await,
        };

        outcome.map_err(|e| {
            if e.status.is_none() && e.message.contains("not navigable") {
                return CallError::from(RpcError::invalid_path(path));
            }
            if e.status.is_none() && e.message.contains("not callable") {
                return CallError::from(RpcError::method_not_found(path));
            }
            CallError::from(RpcError::classify_http(e.status, &e.message))
        })
    }

    async fn close(&self) {
        if let Some(session) = self.session.get() {
            session.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSession {
        disposed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn call(
            &self,
            path: &str,
            args: Vec<Value>,
            _headers: &[(&str, String)],
        ) -> Result<Value, SessionCallError> {
            if path == "slow.method" {
                tokio::time::sleep(Duration::from_millis(200)).await;
                return Ok(Value::Null);
            }
            if path == "missing.method" {
                return Err(SessionCallError {
                    status: Some(404),
                    message: "not found".into(),
                });
            }
            Ok(serde_json::json!({"path": path, "args": args}))
        }

        async fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        opens: Arc<AtomicU32>,
        disposed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open_http_session(&self) -> Result<Arc<dyn Session>, String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeSession {
                disposed: self.disposed.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn nested_call_returns_decoded_result() {
        let factory = Arc::new(FakeFactory {
            opens: Arc::new(AtomicU32::new(0)),
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let t = HttpTransport::new(factory);
        let result = t
            .call("db.users.find", vec![serde_json::json!({"id": "123"})])
            .await
            .unwrap();
        assert_eq!(result["path"], "db.users.find");
    }

    #[tokio::test]
    async fn session_is_opened_once_across_concurrent_calls() {
        let factory = Arc::new(FakeFactory {
            opens: Arc::new(AtomicU32::new(0)),
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let t = Arc::new(HttpTransport::new(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let t = t.clone();
            handles.push(tokio::spawn(async move { t.call("a.b", vec![]).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(factory.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn call_races_against_timeout() {
        let factory = Arc::new(FakeFactory {
            opens: Arc::new(AtomicU32::new(0)),
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let t = HttpTransport::new(factory).with_timeout(Duration::from_millis(10));
        let err = t.call("slow.method", vec![]).await.unwrap_err();
        match err {
            CallError::Transport(e) => assert_eq!(e.code(), "REQUEST_TIMEOUT"),
            _ => panic!("expected transport timeout"),
        }
    }

    #[tokio::test]
    async fn classifies_4xx_as_rpc_error() {
        let factory = Arc::new(FakeFactory {
            opens: Arc::new(AtomicU32::new(0)),
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        });
        let t = HttpTransport::new(factory);
        let err = t.call("missing.method", vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::Rpc(_)));
    }

    #[tokio::test]
    async fn close_disposes_session_exactly_once() {
        let disposed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let factory = Arc::new(FakeFactory {
            opens: Arc::new(AtomicU32::new(0)),
            disposed: disposed.clone(),
        });
        let t = HttpTransport::new(factory);
        t.call("a.b", vec![]).await.unwrap();
        t.close().await;
        t.close().await;
        assert!(disposed.load(Ordering::SeqCst));
    }
}
