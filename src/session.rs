//! C4 — the session record.
//!
//! Grounded directly on the original implementation's `BrowserSession`
//! dataclass (`tv/core/session_manager.py`): same field set, same
//! expiry/idle/health predicates, same `mark_used`/`mark_error` mutators.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::browser::BrowserHandle;

/// Opaque bundle naming who a session is authenticated as. The core never
/// inspects `credential` — it is handed verbatim to an [`crate::manager::Authenticator`].
pub struct Principal {
    pub identity: String,
    pub credential: Arc<dyn Credential>,
}

impl Principal {
    pub fn new(identity: impl Into<String>, credential: Arc<dyn Credential>) -> Self {
        Self { identity: identity.into(), credential }
    }
}

impl Clone for Principal {
    fn clone(&self) -> Self {
        Self { identity: self.identity.clone(), credential: self.credential.clone() }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal").field("identity", &self.identity).finish_non_exhaustive()
    }
}

/// Marker trait for credential material. Implementors carry whatever an
/// `Authenticator` needs (password, token, TOTP seed); the core treats it
/// as opaque.
pub trait Credential: Send + Sync {}

/// A newtype identifying a live session. Generated once at creation, never
/// reused after retirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pooled browser session: a handle plus lifecycle bookkeeping.
pub struct Session {
    pub id: SessionId,
    pub browser: Arc<BrowserHandle>,
    created_at: Instant,
    last_used_at: Instant,
    pub usage_count: u64,
    pub error_count: u32,
    pub busy: bool,
    pub authenticated: bool,
    pub principal: Option<Principal>,
}

impl Session {
    pub fn new(browser: Arc<BrowserHandle>) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::new(),
            browser,
            created_at: now,
            last_used_at: now,
            usage_count: 0,
            error_count: 0,
            busy: false,
            authenticated: false,
            principal: None,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn expired(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }

    pub fn idle_too_long(&self, max_idle: Duration) -> bool {
        !self.busy && self.idle_time() >= max_idle
    }

    pub fn healthy(&self, max_errors: u32) -> bool {
        self.error_count < max_errors
    }

    pub fn mark_used(&mut self) {
        self.last_used_at = Instant::now();
        self.usage_count += 1;
        self.busy = true;
    }

    pub fn mark_idle(&mut self) {
        self.last_used_at = Instant::now();
        self.busy = false;
    }

    pub fn mark_error(&mut self) {
        self.error_count += 1;
    }

    pub fn mark_authenticated(&mut self, principal: Principal) {
        self.authenticated = true;
        self.principal = Some(principal);
    }

    /// Whether this session is authenticated as `identity` specifically
    /// (re-auth is required if it is authenticated as someone else).
    pub fn authenticated_as(&self, identity: &str) -> bool {
        self.authenticated && self.principal.as_ref().map(|p| p.identity == identity).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::ScriptedEngine;
    use crate::config::MetricsConfig;
    use crate::recorder::OperationRecorder;
    use std::sync::Arc;

    fn test_session() -> Session {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        let handle = Arc::new(BrowserHandle::new(Arc::new(ScriptedEngine::default()), recorder, Duration::from_secs(1)));
        Session::new(handle)
    }

    #[test]
    fn new_session_is_not_busy_or_authenticated() {
        let session = test_session();
        assert!(!session.busy);
        assert!(!session.authenticated);
        assert_eq!(session.usage_count, 0);
    }

    #[test]
    fn mark_error_reduces_health() {
        let mut session = test_session();
        for _ in 0..5 {
            session.mark_error();
        }
        assert!(!session.healthy(5));
        assert!(session.healthy(6));
    }

    #[test]
    fn idle_too_long_ignores_busy_sessions() {
        let mut session = test_session();
        session.mark_used();
        assert!(!session.idle_too_long(Duration::from_nanos(1)));
    }
}
