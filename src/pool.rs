//! C5 — the session pool.
//!
//! Grounded on the teacher's `browser_pool.rs` (`BrowserPool`'s acquire-
//! retry loop, health-check thresholds, staggered janitor interval) and the
//! original implementation's `SessionPool` (`tv/core/session_manager.py`,
//! `get_session`/`return_session`/`_maintain_pool_size`). One deliberate
//! departure from the teacher: the session map and the available-id set
//! live behind a *single* lock (`PoolState`), per the spec's requirement
//! that the mapping and the set be protected together — the teacher's two
//! separate `Mutex`es (`instances`, `available`) would let them drift out
//! of sync under contention.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::browser::{BrowserHandle, ChromiumEngine};
use crate::config::{BrowserLaunchConfig, PoolConfig};
use crate::error::RuntimeError;
use crate::interceptor::RequestInterceptor;
use crate::recorder::OperationRecorder;
use crate::session::{Session, SessionId};
use crate::timing;

/// Creates the `BrowserHandle` backing a new session. Injected so tests can
/// substitute a scripted engine instead of launching a real browser,
/// mirroring the teacher's per-instance `create_browser_instance`.
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<BrowserHandle>, RuntimeError>;
}

/// The real factory: launches a `ChromiumEngine` per session.
pub struct ChromiumSessionFactory {
    pub launch_config: BrowserLaunchConfig,
    pub recorder: Arc<OperationRecorder>,
    pub default_wait: Duration,
    pub interceptor: Option<RequestInterceptor>,
    next_id: AtomicUsize,
}

impl ChromiumSessionFactory {
    pub fn new(launch_config: BrowserLaunchConfig, recorder: Arc<OperationRecorder>, default_wait: Duration, interceptor: Option<RequestInterceptor>) -> Self {
        Self { launch_config, recorder, default_wait, interceptor, next_id: AtomicUsize::new(0) }
    }
}

#[async_trait::async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn create(&self) -> Result<Arc<BrowserHandle>, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let engine = ChromiumEngine::launch(&self.launch_config, id, self.interceptor.clone()).await?;
        Ok(Arc::new(BrowserHandle::new(Arc::new(engine), self.recorder.clone(), self.default_wait)))
    }
}

struct PoolState {
    sessions: HashMap<SessionId, Session>,
    available: VecDeque<SessionId>,
    retiring: HashSet<SessionId>,
}

impl PoolState {
    fn live_count(&self) -> usize {
        self.sessions.len()
    }
}

/// C5's central collaborator. Owns every live `Session`; callers interact
/// through [`Lease`]s acquired via [`SessionPool::acquire`].
pub struct SessionPool {
    state: Mutex<PoolState>,
    reserved: AtomicUsize,
    factory: Arc<dyn SessionFactory>,
    config: PoolConfig,
    recorder: Arc<OperationRecorder>,
    shutting_down: Arc<AtomicBool>,
    janitor: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, config: PoolConfig, recorder: Arc<OperationRecorder>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState { sessions: HashMap::new(), available: VecDeque::new(), retiring: HashSet::new() }),
            reserved: AtomicUsize::new(0),
            factory,
            config,
            recorder,
            shutting_down: Arc::new(AtomicBool::new(false)),
            janitor: Mutex::new(None),
        })
    }

    /// Acquires a lease on a session, creating one if the pool has capacity
    /// and none are idle. Bounded by `timeout` (falling back to the pool's
    /// configured default).
    ///
    /// Creation happens *outside* the state lock: a reservation counter
    /// claims capacity under the lock, the (slow, fallible) browser launch
    /// runs unlocked, and the result is reconciled back under the lock —
    /// so a launch in progress never blocks unrelated acquire/release
    /// traffic.
    pub async fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> Result<Lease, RuntimeError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(RuntimeError::PoolShutDown);
        }

        let deadline = Instant::now() + timeout.unwrap_or(self.config.acquire_timeout);

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(RuntimeError::PoolShutDown);
            }

            // Fast path: an idle, healthy session is already available.
            {
                let mut state = self.state.lock().await;
                while let Some(id) = state.available.pop_front() {
                    let healthy = state
                        .sessions
                        .get(&id)
                        .map(|s| s.healthy(self.config.max_errors) && !s.expired(self.config.max_age))
                        .unwrap_or(false);
                    if healthy {
                        let session = state.sessions.get_mut(&id).expect("id came from sessions map");
                        session.mark_used();
                        let browser = session.browser.clone();
                        return Ok(Lease::new(id, self.clone(), browser));
                    } else {
                        state.sessions.remove(&id);
                        state.retiring.remove(&id);
                    }
                }
            }

            // No idle session. Claim capacity to create a new one, if any.
            let reserved_slot = {
                let state = self.state.lock().await;
                let total_in_flight = state.live_count() + self.reserved.load(Ordering::SeqCst);
                if total_in_flight < self.config.max_size {
                    self.reserved.fetch_add(1, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            };

            if reserved_slot {
                let created = self.factory.create().await;
                match created {
                    Ok(handle) => {
                        let mut session = Session::new(handle);
                        session.mark_used();
                        let id = session.id.clone();
                        let browser = session.browser.clone();
                        // Insert and release the reservation under the same
                        // lock acquisition, so no window exists where the
                        // slot is counted in neither `reserved` nor
                        // `live_count()` (Invariant 1: size bound).
                        let mut state = self.state.lock().await;
                        state.sessions.insert(id.clone(), session);
                        self.reserved.fetch_sub(1, Ordering::SeqCst);
                        drop(state);
                        info!(session = %id, "created new session");
                        return Ok(Lease::new(id, self.clone(), browser));
                    }
                    Err(err) => {
                        self.reserved.fetch_sub(1, Ordering::SeqCst);
                        warn!(error = %err, "session creation failed, will retry if time remains");
                        if Instant::now() >= deadline {
                            return Err(RuntimeError::AcquireTimeout(timeout.unwrap_or(self.config.acquire_timeout)));
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(RuntimeError::AcquireTimeout(timeout.unwrap_or(self.config.acquire_timeout)));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Returns a session to the pool, or retires it. A session is retired
    /// rather than returned if it errored this lease, is now unhealthy,
    /// has aged out, or was marked for retirement by the janitor while it
    /// was leased out (Open Question 1 in `DESIGN.md`: retire wins).
    pub(crate) async fn release(&self, id: &SessionId, had_error: bool) {
        let mut state = self.state.lock().await;
        let retiring_while_leased = state.retiring.remove(id);

        let Some(session) = state.sessions.get_mut(id) else {
            warn!(session = %id, "release called for unknown session id");
            return;
        };

        session.mark_idle();
        if had_error {
            session.mark_error();
        }

        let should_retire = retiring_while_leased
            || !session.healthy(self.config.max_errors)
            || session.expired(self.config.max_age)
            || self.shutting_down.load(Ordering::SeqCst);

        if should_retire {
            let session = state.sessions.remove(id).expect("checked above");
            drop(state);
            self.close_session(session).await;
        } else {
            state.available.push_back(id.clone());
        }
    }

    /// Whether the session behind `id` is currently authenticated as
    /// `identity`. Used by `SessionManager::with_authenticated_lease` to
    /// decide whether re-authentication is needed.
    pub(crate) async fn is_authenticated_as(&self, id: &SessionId, identity: &str) -> bool {
        let state = self.state.lock().await;
        state.sessions.get(id).map(|s| s.authenticated_as(identity)).unwrap_or(false)
    }

    /// Records that the session behind `id` successfully authenticated as
    /// `principal`. Additive: does not affect whether unauthenticated
    /// callers can still acquire this session later (Open Question 2 in
    /// `DESIGN.md`: authenticated sessions stay visible to everyone).
    pub(crate) async fn mark_authenticated(&self, id: &SessionId, principal: crate::session::Principal) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(id) {
            session.mark_authenticated(principal);
        }
    }

    async fn close_session(&self, session: Session) {
        if let Err(err) = session.browser.close().await {
            warn!(error = %err, "error closing retired session, continuing");
        }
    }

    /// Retires one idle, unhealthy/aged-out session and tops the pool back
    /// up to `min_size`. Grounded on `_maintain_pool_size`/`_cleanup_expired_sessions`
    /// in the original implementation's `SessionPool`, and the teacher's
    /// `health_check`/staggered `start_health_check_task`.
    async fn janitor_tick(&self) {
        let to_retire: Vec<SessionId> = {
            let state = self.state.lock().await;
            state
                .available
                .iter()
                .filter(|id| {
                    state
                        .sessions
                        .get(id)
                        .map(|s| s.idle_too_long(self.config.max_idle) || s.expired(self.config.max_age) || !s.healthy(self.config.max_errors))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for id in to_retire {
            let mut state = self.state.lock().await;
            state.available.retain(|a| a != &id);
            if let Some(session) = state.sessions.remove(&id) {
                drop(state);
                info!(session = %id, "janitor retiring session");
                self.close_session(session).await;
            }
        }

        // Also mark any leased-out session that has simply aged past
        // max_age for retirement on its next release, without touching it
        // while it's in use.
        {
            let mut state = self.state.lock().await;
            let stale: Vec<SessionId> = state
                .sessions
                .iter()
                .filter(|(id, s)| s.busy && s.expired(self.config.max_age) && !state.retiring.contains(*id))
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                state.retiring.insert(id);
            }
        }

        let deficit = {
            let state = self.state.lock().await;
            self.config.min_size.saturating_sub(state.live_count())
        };

        // A failed refill is not fatal: it shrinks the pool below
        // `min_size` until the next tick succeeds (Open Question 3 in
        // `DESIGN.md`). We stop at the first failure rather than hammering
        // the factory `deficit` times in a row within one tick.
        for _ in 0..deficit {
            match self.factory.create().await {
                Ok(handle) => {
                    let session = Session::new(handle);
                    let id = session.id.clone();
                    let mut state = self.state.lock().await;
                    state.sessions.insert(id.clone(), session);
                    state.available.push_back(id.clone());
                    info!(session = %id, "janitor refilled pool");
                }
                Err(err) => {
                    warn!(error = %err, "janitor refill failed, backing off until next tick");
                    break;
                }
            }
        }
    }

    /// Starts the janitor loop. Explicit, not automatic from `new`, so the
    /// resource root controls when background work begins and ends.
    pub async fn spawn_janitor(self: &Arc<Self>) {
        let mut guard = self.janitor.lock().await;
        if guard.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        let pool = self.clone();
        let interval = self.config.janitor_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pool.janitor_tick().await,
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *guard = Some((handle, tx));
    }

    /// Idempotent teardown: stops granting new leases, stops the janitor,
    /// and drains every live session (waiting briefly for in-flight leases
    /// to release before force-closing what remains).
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some((handle, tx)) = self.janitor.lock().await.take() {
            let _ = tx.send(true);
            let _ = handle.await;
        }

        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            let still_busy = {
                let state = self.state.lock().await;
                state.sessions.values().any(|s| s.busy)
            };
            if !still_busy || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining: Vec<Session> = {
            let mut state = self.state.lock().await;
            state.available.clear();
            state.retiring.clear();
            state.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in remaining {
            self.close_session(session).await;
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            live: state.live_count(),
            available: state.available.len(),
            reserved: self.reserved.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub live: usize,
    pub available: usize,
    pub reserved: usize,
}

/// RAII lease on a session. Guarantees release on every exit path: an
/// explicit, ordered `release` on the happy path, and a spawned fallback
/// in `Drop` covering panics and cancellation (a future dropped mid-await
/// by a `tokio::select!` can't run an async destructor).
///
/// Holds a plain `Arc<SessionPool>` clone — shared ownership, not a cycle:
/// the pool never holds a reference back to a lease.
pub struct Lease {
    id: Option<SessionId>,
    pool: Arc<SessionPool>,
    pub browser: Arc<BrowserHandle>,
    had_error: bool,
}

impl Lease {
    fn new(id: SessionId, pool: Arc<SessionPool>, browser: Arc<BrowserHandle>) -> Lease {
        Self { id: Some(id), pool, browser, had_error: false }
    }

    pub fn id(&self) -> &SessionId {
        self.id.as_ref().expect("lease used after release")
    }

    /// Whether this lease's session is authenticated as `identity`.
    pub async fn authenticated_as(&self, identity: &str) -> bool {
        self.pool.is_authenticated_as(self.id(), identity).await
    }

    /// Records that this lease's session authenticated as `principal`.
    pub async fn mark_authenticated(&self, principal: crate::session::Principal) {
        self.pool.mark_authenticated(self.id(), principal).await;
    }

    /// Flags this lease as having encountered an error; on release the
    /// session's error count is incremented and it may be retired instead
    /// of returned to the pool.
    pub fn mark_error(&mut self) {
        self.had_error = true;
    }

    /// Deterministic release: awaits the pool's bookkeeping directly rather
    /// than relying on `Drop`'s spawned fallback. Preferred on every normal
    /// exit path; `Drop` exists only to guarantee release when this wasn't
    /// reachable (cancellation, panic).
    pub async fn release(mut self) {
        if let Some(id) = self.id.take() {
            self.pool.release(&id, self.had_error).await;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let pool = self.pool.clone();
            let had_error = self.had_error;
            tokio::spawn(async move {
                pool.release(&id, had_error).await;
            });
        }
    }
}
