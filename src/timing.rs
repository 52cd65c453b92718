//! Timing primitives: bounded waits, exponential-backoff retry, and the
//! per-operation "smart delay" table.
//!
//! Grounded on the original implementation's `TimingManager`
//! (`tv/utils/timing_utils.py`): `wait_for_element`/`wait_for_clickable`
//! poll a predicate and return a bool rather than raising on timeout;
//! `progressive_delay` is the exponential-backoff formula `retry` uses;
//! `smart_delay` is the operation-kind delay table carried unchanged.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::{OperationKind, TimingConfig};
use crate::error::{CircuitBreaker, RuntimeError};

/// Polls `predicate` until it resolves to `Some(T)` or `timeout` elapses.
///
/// A predicate timeout is a negative result, not an error: callers that
/// want a hard failure on timeout should map the `None` themselves.
pub async fn wait_for<F, Fut, T>(mut predicate: F, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(100);

    loop {
        if let Some(value) = predicate().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

/// Polls a boolean condition until it is stable (unchanged) for
/// `stable_for`, or `timeout` elapses without stabilizing.
///
/// Grounded on `wait_until_stable` in `tv/utils/timing_utils.py`, which
/// polls element text every 100ms and tracks the last-changed timestamp.
pub async fn wait_stable<F, Fut, T>(mut read: F, stable_for: Duration, timeout: Duration) -> Option<T>
where
    T: PartialEq + Clone,
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(100);

    let mut last = read().await;
    let mut last_changed = Instant::now();

    loop {
        if Instant::now().duration_since(last_changed) >= stable_for {
            return Some(last);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(poll_interval).await;
        let current = read().await;
        if current != last {
            last = current;
            last_changed = Instant::now();
        }
    }
}

/// Runs `op` up to `max_attempts` times with exponential backoff
/// (`base_delay * 2^(attempt-1)`, capped at `max_delay`), retrying only
/// errors for which `retryable` returns true.
///
/// An optional [`CircuitBreaker`] can be supplied to fail fast: when the
/// breaker is open, `retry` returns [`RuntimeError::Fatal`] immediately
/// instead of spending an attempt.
pub async fn retry<F, Fut, T>(
    mut op: F,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    breaker: Option<&CircuitBreaker>,
) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>,
{
    let mut attempt = 0;
    loop {
        if let Some(breaker) = breaker {
            if !breaker.can_execute() {
                return Err(RuntimeError::Fatal("circuit breaker open".into()));
            }
        }

        attempt += 1;
        match op().await {
            Ok(value) => {
                if let Some(breaker) = breaker {
                    breaker.record_success();
                }
                return Ok(value);
            }
            Err(err) => {
                if let Some(breaker) = breaker {
                    breaker.record_failure();
                }
                if attempt >= max_attempts || !err.is_retryable() {
                    return Err(err);
                }
                let delay = (base_delay * 2u32.pow((attempt - 1) as u32)).min(max_delay);
                warn!(attempt, ?delay, error = %err, "retrying after failure");
                sleep(delay).await;
            }
        }
    }
}

/// Applies the configured settle delay for `kind` after an interaction.
/// Grounded on `smart_delay` in `tv/utils/timing_utils.py`; falls back to
/// 200ms when a kind has no entry (config is expected to carry all seven,
/// but callers may construct a partial table in tests).
pub async fn smart_delay(kind: OperationKind, config: &TimingConfig) {
    let delay = config
        .smart_delay
        .get(&kind)
        .copied()
        .unwrap_or(Duration::from_millis(200));
    debug!(?kind, ?delay, "applying smart delay");
    sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_for_returns_some_once_predicate_matches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = wait_for(
            move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    if n >= 2 {
                        Some(n)
                    } else {
                        None
                    }
                }
            },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(result, Some(2));
    }

    #[tokio::test]
    async fn wait_for_times_out_without_erroring() {
        let result: Option<()> = wait_for(|| async { None }, Duration::from_millis(150)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn retry_gives_up_on_non_retryable_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result: Result<(), RuntimeError> = retry(
            move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(RuntimeError::Cancelled)
                }
            },
            5,
            Duration::from_millis(1),
            Duration::from_millis(10),
            None,
        )
        .await;
        assert!(matches!(result, Err(RuntimeError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhausts_max_attempts_on_retryable_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result: Result<(), RuntimeError> = retry(
            move || {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(RuntimeError::Timeout(Duration::from_millis(1)))
                }
            },
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            None,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();
        let result = retry(
            move || {
                let a = a.clone();
                async move {
                    let n = a.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(RuntimeError::BrowserFailure("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
            Duration::from_millis(1),
            Duration::from_millis(5),
            None,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }
}
