//! Auth provider abstraction: an opaque token source, optionally async, with
//! a caching wrapper (single-flight refresh within a TTL window) and a
//! composite provider that tries sources in order.
//!
//! Grounded on the teacher's `ipc/auth.rs` bearer-token model, generalized
//! from "one fixed local token" to "pluggable, possibly-remote token
//! sources" per the spec's auth chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TransportError;

/// An opaque token, or `None` meaning "no auth for this call".
pub type AuthToken = Option<String>;

/// Produces an auth token on demand. Implementations may hit the network,
/// so `fetch` is async and fallible.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn fetch(&self) -> Result<AuthToken, TransportError>;
}

/// A provider backed by a fixed, already-known token (or no auth at all).
pub struct StaticAuth {
    token: AuthToken,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn fetch(&self) -> Result<AuthToken, TransportError> {
        Ok(self.token.clone())
    }
}

struct Cached {
    token: AuthToken,
    expires_at: Instant,
}

/// Wraps another provider with a TTL cache and single-flight refresh: at
/// most one in-flight fetch exists at a time (invariant 4, §3) — concurrent
/// callers within the refresh window await the same in-flight future
/// instead of issuing their own fetch.
pub struct CachingAuth {
    inner: Arc<dyn AuthProvider>,
    ttl: Duration,
    refresh_buffer: Duration,
    state: Mutex<Option<Cached>>,
}

impl CachingAuth {
    pub fn new(inner: Arc<dyn AuthProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            refresh_buffer: Duration::from_secs(0),
            state: Mutex::new(None),
        }
    }

    /// Refetch this much earlier than the nominal TTL, to avoid serving a
    /// token that expires mid-flight on the wire.
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }
}

#[async_trait]
impl AuthProvider for CachingAuth {
    async fn fetch(&self) -> Result<AuthToken, TransportError> {
        // Single critical section: holding the lock across the (possibly
        // slow) inner fetch is what gives single-flight semantics — a
        // second caller blocks here rather than starting its own fetch.
        let mut guard = self.state.lock().await;

        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                debug!("auth: serving cached token");
                return Ok(cached.token.clone());
            }
        }

        debug!("auth: cache miss — fetching token");
        let token = self.inner.fetch().await?;
        let usable_ttl = self.ttl.saturating_sub(self.refresh_buffer);
        *guard = Some(Cached {
            token: token.clone(),
            expires_at: Instant::now() + usable_ttl,
        });
        Ok(token)
    }
}

/// Tries child providers in order, returning the first one that yields a
/// non-`None` token (or the last error if every provider fails outright).
pub struct CompositeAuth {
    providers: Vec<Arc<dyn AuthProvider>>,
}

impl CompositeAuth {
    pub fn new(providers: Vec<Arc<dyn AuthProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl AuthProvider for CompositeAuth {
    async fn fetch(&self) -> Result<AuthToken, TransportError> {
        let mut last_err = None;
        for provider in &self.providers {
            match provider.fetch().await {
                Ok(Some(token)) => return Ok(Some(token)),
                Ok(None) => continue,
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Recognized global token env vars (§6): `DO_ADMIN_TOKEN` preferred,
/// `DO_TOKEN` as fallback. Per the REDESIGN FLAGS this is an explicit
/// constructor invoked once at application startup, never an implicit
/// read inside a transport.
pub fn auth_chain_from_env() -> Arc<dyn AuthProvider> {
    if let Ok(token) = std::env::var("DO_ADMIN_TOKEN") {
        if !token.is_empty() {
            return Arc::new(StaticAuth::new(token));
        }
    }
    if let Ok(token) = std::env::var("DO_TOKEN") {
        if !token.is_empty() {
            return Arc::new(StaticAuth::new(token));
        }
    }
    Arc::new(StaticAuth::none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingAuth {
        calls: AtomicU32,
        token: String,
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        async fn fetch(&self) -> Result<AuthToken, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.token.clone()))
        }
    }

    #[tokio::test]
    async fn caching_auth_serves_cached_value_within_ttl() {
        let inner = Arc::new(CountingAuth {
            calls: AtomicU32::new(0),
            token: "tok".into(),
        });
        let cache = CachingAuth::new(inner.clone(), Duration::from_secs(60));

        for _ in 0..5 {
            assert_eq!(cache.fetch().await.unwrap(), Some("tok".to_string()));
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn caching_auth_refetches_after_expiry() {
        let inner = Arc::new(CountingAuth {
            calls: AtomicU32::new(0),
            token: "tok".into(),
        });
        let cache = CachingAuth::new(inner.clone(), Duration::from_millis(10));
        cache.fetch().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.fetch().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn composite_auth_tries_sources_in_order() {
        let composite = CompositeAuth::new(vec![
            Arc::new(StaticAuth::none()),
            Arc::new(StaticAuth::new("second")),
            Arc::new(StaticAuth::new("third")),
        ]);
        assert_eq!(composite.fetch().await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn composite_auth_returns_none_when_all_sources_abstain() {
        let composite = CompositeAuth::new(vec![
            Arc::new(StaticAuth::none()),
            Arc::new(StaticAuth::none()),
        ]);
        assert_eq!(composite.fetch().await.unwrap(), None);
    }
}
