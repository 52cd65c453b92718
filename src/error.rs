use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

/// The runtime's single error type. Every fallible operation in the crate
/// returns `Result<T, RuntimeError>` — no panics, no exceptions-as-control-flow.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A bounded wait elapsed without the awaited condition becoming true.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The browser engine collaborator reported a failure (navigation,
    /// element interaction, CDP transport, process crash).
    #[error("browser failure: {0}")]
    BrowserFailure(String),

    /// An `Authenticator` rejected or failed to complete a login.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// `SessionPool::acquire` could not hand out a session before its
    /// deadline, distinct from `Timeout` to let callers distinguish
    /// "the pool is saturated" from "a browser operation was slow".
    #[error("acquire timed out after {0:?}")]
    AcquireTimeout(Duration),

    /// The pool has been shut down; no further leases will be granted.
    #[error("pool is shut down")]
    PoolShutDown,

    /// The operation was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,

    /// An internal invariant was violated (e.g. a released lease's session
    /// id was not present in the pool). Always a bug, never a caller error.
    #[error("internal invariant violated: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RuntimeError {
    /// Whether a caller built on `retry()` should spend another attempt on
    /// this error. `AuthenticationFailed`, `PoolShutDown`, `Cancelled`, and
    /// `Fatal` are never retryable: retrying them cannot change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout(_) | RuntimeError::BrowserFailure(_) | RuntimeError::AcquireTimeout(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RuntimeError::Timeout(_) => ErrorSeverity::Low,
            RuntimeError::AcquireTimeout(_) => ErrorSeverity::Medium,
            RuntimeError::BrowserFailure(_) => ErrorSeverity::Medium,
            RuntimeError::AuthenticationFailed(_) => ErrorSeverity::High,
            RuntimeError::PoolShutDown => ErrorSeverity::High,
            RuntimeError::Cancelled => ErrorSeverity::Low,
            RuntimeError::Fatal(_) => ErrorSeverity::Critical,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for RuntimeError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        RuntimeError::BrowserFailure(err.to_string())
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        RuntimeError::BrowserFailure(err.to_string())
    }
}

impl From<tokio::sync::AcquireError> for RuntimeError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        RuntimeError::Fatal(err.to_string())
    }
}

/// Optional guard wired into `retry()` (see `timing.rs`): trips open after
/// `failure_threshold` consecutive failures and fails fast until
/// `recovery_timeout` has passed, then allows one probe attempt (half-open).
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<CircuitState>>,
    failure_threshold: usize,
    recovery_timeout: Duration,
    failure_count: Arc<AtomicUsize>,
    last_failure_time: Arc<Mutex<Option<Instant>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(CircuitState::Closed)),
            failure_threshold,
            recovery_timeout,
            failure_count: Arc::new(AtomicUsize::new(0)),
            last_failure_time: Arc::new(Mutex::new(None)),
        }
    }

    pub fn can_execute(&self) -> bool {
        let state = *self.state.lock().unwrap();
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let reopened = self
                    .last_failure_time
                    .lock()
                    .unwrap()
                    .map(|last| last.elapsed() > self.recovery_timeout)
                    .unwrap_or(false);
                if reopened {
                    *self.state.lock().unwrap() = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        *self.state.lock().unwrap() = CircuitState::Closed;
        *self.last_failure_time.lock().unwrap() = None;
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_failure_time.lock().unwrap() = Some(Instant::now());
        if failures >= self.failure_threshold {
            *self.state.lock().unwrap() = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap()
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(RuntimeError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(RuntimeError::BrowserFailure("x".into()).is_retryable());
        assert!(!RuntimeError::PoolShutDown.is_retryable());
        assert!(!RuntimeError::Cancelled.is_retryable());
        assert!(!RuntimeError::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(50));
        assert!(breaker.can_execute());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn circuit_breaker_half_opens_after_recovery() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
