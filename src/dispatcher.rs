//! C7 — the concurrent task dispatcher.
//!
//! Grounded on the teacher's `screenshot_service.rs` (`process_requests`:
//! spawn one task per request, collect results preserving submission
//! order), reworked per spec.md §4.6 to drop the teacher's separate
//! `Semaphore` — degree of parallelism here is governed solely by how many
//! leases the pool can grant, not by a second limiter layered on top.
//! Cancellation is cooperative, signaled by a `tokio::sync::watch<bool>`
//! token (the same primitive the teacher's `main.rs` uses for its shutdown
//! broadcast, generalized to a reusable token rather than a one-shot
//! channel).

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tracing::debug;

use crate::error::RuntimeError;
use crate::manager::SessionManager;
use crate::pool::Lease;

/// Outcome of one dispatched job.
pub enum JobOutcome<T> {
    Done(T),
    Failed(RuntimeError),
    Cancelled,
}

impl<T> JobOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done(_))
    }
}

/// A cooperative cancellation signal shared across a fan-out. Cloning is
/// cheap (wraps a `watch::Receiver`); calling [`CancelToken::cancel`] on
/// any clone of the paired sender cancels every job watching it.
#[derive(Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// The other half of a [`CancelToken`]: call [`CancelSource::cancel`] to
/// signal every job in the fan-out it guards.
pub struct CancelSource(watch::Sender<bool>);

impl CancelSource {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self(tx), CancelToken(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Runs `op` once per item in `jobs`, each against its own leased session,
/// bounded solely by how many leases the pool can grant concurrently.
/// Results preserve input order; one job's failure never cancels its
/// siblings. If `cancel` is tripped, jobs not yet started resolve to
/// `Cancelled` without ever acquiring a lease, and an in-flight job checks
/// the token between awaited steps so its own lease is always released
/// before it reports `Cancelled`.
pub async fn fan_out<J, F, Fut, T>(jobs: Vec<J>, manager: Arc<SessionManager>, acquire_timeout: Option<Duration>, cancel: CancelToken, op: F) -> Vec<JobOutcome<T>>
where
    J: Send + 'static,
    T: Send + 'static,
    F: Fn(Lease, J) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = Result<T, RuntimeError>> + Send,
{
    let tasks = jobs.into_iter().map(|job| {
        let manager = manager.clone();
        let cancel = cancel.clone();
        let op = op.clone();
        tokio::spawn(async move {
            if cancel.is_cancelled() {
                return JobOutcome::Cancelled;
            }

            let lease = match manager.with_lease(acquire_timeout).await {
                Ok(lease) => lease,
                Err(err) => return JobOutcome::Failed(err),
            };

            if cancel.is_cancelled() {
                lease.release().await;
                return JobOutcome::Cancelled;
            }

            match op(lease, job).await {
                Ok(value) => JobOutcome::Done(value),
                Err(RuntimeError::Cancelled) => JobOutcome::Cancelled,
                Err(err) => JobOutcome::Failed(err),
            }
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                debug!(error = %join_err, "dispatcher task panicked or was aborted");
                JobOutcome::Failed(RuntimeError::Fatal(join_err.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::ScriptedEngine;
    use crate::browser::BrowserHandle;
    use crate::config::{MetricsConfig, PoolConfig};
    use crate::manager::NoopAuthenticator;
    use crate::pool::{SessionFactory, SessionPool};
    use crate::recorder::OperationRecorder;
    use async_trait::async_trait;

    struct ScriptedFactory {
        recorder: Arc<OperationRecorder>,
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        async fn create(&self) -> Result<Arc<BrowserHandle>, RuntimeError> {
            Ok(Arc::new(BrowserHandle::new(Arc::new(ScriptedEngine::default()), self.recorder.clone(), Duration::from_secs(1))))
        }
    }

    fn test_manager(max_size: usize) -> Arc<SessionManager> {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        let factory = Arc::new(ScriptedFactory { recorder: recorder.clone() });
        let pool = SessionPool::new(factory, PoolConfig { max_size, ..PoolConfig::default() }, recorder);
        SessionManager::new(pool, Arc::new(NoopAuthenticator))
    }

    #[tokio::test]
    async fn preserves_input_order() {
        let manager = test_manager(4);
        let jobs: Vec<u32> = (0..10).collect();
        let (_source, token) = CancelSource::new();
        let results = fan_out(jobs.clone(), manager, None, token, |lease, job: u32| async move {
            lease.release().await;
            Ok::<u32, RuntimeError>(job)
        })
        .await;

        let values: Vec<u32> = results
            .into_iter()
            .map(|outcome| match outcome {
                JobOutcome::Done(v) => v,
                _ => panic!("expected Done"),
            })
            .collect();
        assert_eq!(values, jobs);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_siblings() {
        let manager = test_manager(4);
        let jobs: Vec<u32> = vec![1, 2, 3];
        let (_source, token) = CancelSource::new();
        let results = fan_out(jobs, manager, None, token, |lease, job: u32| async move {
            lease.release().await;
            if job == 2 {
                Err(RuntimeError::BrowserFailure("boom".into()))
            } else {
                Ok(job)
            }
        })
        .await;

        assert!(results[0].is_done());
        assert!(matches!(results[1], JobOutcome::Failed(_)));
        assert!(results[2].is_done());
    }

    #[tokio::test]
    async fn cancelling_before_start_yields_cancelled() {
        let manager = test_manager(4);
        let jobs: Vec<u32> = vec![1, 2, 3];
        let (source, token) = CancelSource::new();
        source.cancel();
        let results = fan_out(jobs, manager, None, token, |lease, job: u32| async move {
            lease.release().await;
            Ok::<u32, RuntimeError>(job)
        })
        .await;

        assert!(results.iter().all(|r| matches!(r, JobOutcome::Cancelled)));
    }
}
