//! C6 — the session manager.
//!
//! Grounded on the original implementation's `SessionManager`
//! (`tv/core/session_manager.py`): `get_session` is a scoped acquisition
//! with guaranteed release (there, an `@asynccontextmanager`; here, the
//! `Lease`'s RAII contract from `pool.rs` does the same job), and
//! `get_authenticated_session` re-authenticates only when the session
//! isn't already authenticated as the requested principal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::browser::BrowserHandle;
use crate::error::RuntimeError;
use crate::pool::{Lease, SessionPool};
use crate::session::Principal;

/// The collaborator that performs an actual login against a session's
/// browser. No concrete implementation ships in this crate: selectors and
/// site-specific flows are a caller concern (spec.md §1 Non-goals). A
/// [`NoopAuthenticator`] is provided for tests and as a documented
/// extension point.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, handle: &BrowserHandle, principal: &Principal) -> Result<bool, RuntimeError>;
}

/// Always succeeds without touching the browser. Used in tests and by
/// callers that don't need authenticated sessions at all.
pub struct NoopAuthenticator;

#[async_trait]
impl Authenticator for NoopAuthenticator {
    async fn login(&self, _handle: &BrowserHandle, _principal: &Principal) -> Result<bool, RuntimeError> {
        Ok(true)
    }
}

/// C6's central collaborator. Holds the pool capability it leases from and
/// the authenticator collaborator it delegates logins to.
pub struct SessionManager {
    pool: Arc<SessionPool>,
    authenticator: Arc<dyn Authenticator>,
}

impl SessionManager {
    pub fn new(pool: Arc<SessionPool>, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        Arc::new(Self { pool, authenticator })
    }

    /// Acquires a plain lease, bounded by `timeout` (or the pool's default).
    pub async fn with_lease(&self, timeout: Option<Duration>) -> Result<Lease, RuntimeError> {
        self.pool.acquire(timeout).await
    }

    /// Acquires a lease and ensures it is authenticated as `principal`,
    /// re-authenticating if it's unauthenticated or bound to someone else.
    /// On authentication failure the lease is released as errored (so the
    /// underlying session doesn't silently look healthy) and
    /// `AuthenticationFailed` is returned.
    pub async fn with_authenticated_lease(&self, principal: &Principal, timeout: Option<Duration>) -> Result<Lease, RuntimeError> {
        let mut lease = self.pool.acquire(timeout).await?;

        if lease.authenticated_as(&principal.identity).await {
            return Ok(lease);
        }

        match self.authenticator.login(&lease.browser, principal).await {
            Ok(true) => {
                lease.mark_authenticated(principal.clone()).await;
                Ok(lease)
            }
            Ok(false) => {
                lease.mark_error();
                lease.release().await;
                Err(RuntimeError::AuthenticationFailed(format!("login rejected for {}", principal.identity)))
            }
            Err(err) => {
                lease.mark_error();
                lease.release().await;
                Err(RuntimeError::AuthenticationFailed(err.to_string()))
            }
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::ScriptedEngine;
    use crate::browser::BrowserHandle;
    use crate::config::{MetricsConfig, PoolConfig};
    use crate::pool::SessionFactory;
    use crate::recorder::OperationRecorder;
    use crate::session::Credential;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestCredential;
    impl Credential for TestCredential {}

    struct ScriptedFactory {
        recorder: Arc<OperationRecorder>,
        created: AtomicUsize,
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        async fn create(&self) -> Result<Arc<BrowserHandle>, RuntimeError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(BrowserHandle::new(
                Arc::new(ScriptedEngine::default()),
                self.recorder.clone(),
                Duration::from_secs(1),
            )))
        }
    }

    fn test_manager() -> Arc<SessionManager> {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        let factory = Arc::new(ScriptedFactory { recorder: recorder.clone(), created: AtomicUsize::new(0) });
        let pool = SessionPool::new(factory, PoolConfig { max_size: 2, ..PoolConfig::default() }, recorder);
        SessionManager::new(pool, Arc::new(NoopAuthenticator))
    }

    #[tokio::test]
    async fn with_lease_returns_a_session() {
        let manager = test_manager();
        let lease = manager.with_lease(None).await.unwrap();
        drop(lease);
    }

    #[tokio::test]
    async fn authenticated_lease_marks_principal() {
        let manager = test_manager();
        let principal = Principal::new("trader1", Arc::new(TestCredential));
        let lease = manager.with_authenticated_lease(&principal, None).await.unwrap();
        assert!(lease.authenticated_as("trader1").await);
    }

    #[tokio::test]
    async fn authenticated_lease_does_not_reauth_same_principal() {
        let manager = test_manager();
        let principal = Principal::new("trader1", Arc::new(TestCredential));
        let lease = manager.with_authenticated_lease(&principal, None).await.unwrap();
        let id = lease.id().clone();
        lease.release().await;

        let lease2 = manager.with_authenticated_lease(&principal, None).await.unwrap();
        assert_eq!(*lease2.id(), id, "same session should be reused once authenticated");
    }
}
