//! C8 — the resource root.
//!
//! Grounded on the original implementation's `ResourceManager`
//! (`tv/core/session_manager.py`): an async-context-manager composite that
//! owns a `SessionManager` and a `ConnectionPool` and tears them down in a
//! fixed order on exit. Here, `ResourceRoot::new` is the entry and
//! `ResourceRoot::shutdown` the exit; there is no `Drop`-based implicit
//! teardown (background tasks must stop on an explicit call, per
//! spec.md §9, not a destructor racing process exit the way the teacher's
//! `main.rs` relies on for its shutdown broadcast).
//!
//! `ResourceRoot` is the top of the ownership tree: it owns the pool, the
//! manager (itself holding a capability into the pool, not a second owner
//! that could cycle back), the recorder, and the HTTP pool. Nothing below
//! it owns a reference back up, so there is nothing to leak.

use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::http_pool::HttpPool;
use crate::interceptor::RequestInterceptor;
use crate::manager::{Authenticator, NoopAuthenticator, SessionManager};
use crate::pool::{ChromiumSessionFactory, SessionFactory, SessionPool};
use crate::recorder::OperationRecorder;

/// The whole automation runtime, composed. Construct once per process (or
/// per isolated unit of work); `shutdown` is idempotent and should be
/// called exactly once when the runtime is no longer needed.
pub struct ResourceRoot {
    pub manager: Arc<SessionManager>,
    pub recorder: Arc<OperationRecorder>,
    pub http: Arc<HttpPool>,
    pool: Arc<SessionPool>,
}

impl ResourceRoot {
    /// Builds the full tree and starts its background tasks (the pool's
    /// janitor and the recorder's OS sampler) explicitly — construction is
    /// also where they're told to begin, so there's one place that owns
    /// their lifetime end-to-end.
    pub async fn new(config: RuntimeConfig, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        Self::with_factory_and_interceptor(config, authenticator, None).await
    }

    /// As [`Self::new`], but with the real chromium engine wired to an
    /// optional request interceptor (off by default per spec.md §5).
    pub async fn with_factory_and_interceptor(config: RuntimeConfig, authenticator: Arc<dyn Authenticator>, interceptor: Option<RequestInterceptor>) -> Arc<Self> {
        let recorder = OperationRecorder::new(config.metrics.clone());
        let factory: Arc<dyn SessionFactory> = Arc::new(ChromiumSessionFactory::new(
            config.browser.clone(),
            recorder.clone(),
            config.timing.default_wait,
            interceptor,
        ));
        Self::build(config, authenticator, factory, recorder).await
    }

    /// Test/extension seam: build the root around an arbitrary
    /// [`SessionFactory`] (e.g. one backed by a scripted `BrowserEngine`)
    /// instead of launching real Chrome processes.
    pub async fn with_custom_factory(config: RuntimeConfig, authenticator: Arc<dyn Authenticator>, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let recorder = OperationRecorder::new(config.metrics.clone());
        Self::build(config, authenticator, factory, recorder).await
    }

    async fn build(config: RuntimeConfig, authenticator: Arc<dyn Authenticator>, factory: Arc<dyn SessionFactory>, recorder: Arc<OperationRecorder>) -> Arc<Self> {
        let pool = SessionPool::new(factory, config.pool.clone(), recorder.clone());
        pool.spawn_janitor().await;
        recorder.spawn_sampler().await;

        let manager = SessionManager::new(pool.clone(), authenticator);
        let http = Arc::new(HttpPool::new(&config.http));

        info!("resource root constructed");
        Arc::new(Self { manager, recorder, http, pool })
    }

    /// Convenience constructor wiring a [`NoopAuthenticator`] — the usual
    /// choice for callers that never need authenticated sessions.
    pub async fn unauthenticated(config: RuntimeConfig) -> Arc<Self> {
        Self::new(config, Arc::new(NoopAuthenticator)).await
    }

    /// Idempotent teardown in a fixed order: stop granting new leases and
    /// drain the pool (which also stops its janitor), close the HTTP pool,
    /// then stop the recorder's sampler. Mirrors the original's
    /// `ResourceManager.__aexit__` (`session_manager.shutdown()` before
    /// `connection_pool.close()`).
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        self.http.close().await;
        self.recorder.stop_sampler().await;
        info!("resource root shut down");
    }
}
