//! C2 — the operation recorder.
//!
//! Grounded on the original implementation's `PerformanceMonitor`
//! (`tv/core/performance_monitor.py`): per-operation `OperationStats` with a
//! bounded recent-latency window, a retained/size-bounded event log, and a
//! background system sampler. The teacher's `metrics.rs` supplies the Rust
//! idiom (structured counters via the `metrics` crate, a background
//! `tokio::spawn` sampling loop) this module is built in.
//!
//! The recorder is a capability: constructors take `Arc<OperationRecorder>`
//! rather than reaching for a global. A thin `OnceLock`-backed process
//! accessor is provided at the bottom for callers who want one anyway.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use sysinfo::{CpuExt, DiskExt, NetworkExt, System, SystemExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::MetricsConfig;

/// Running statistics for one named operation. Mirrors the original
/// `OperationStats` dataclass field-for-field.
#[derive(Debug, Clone)]
pub struct OperationStats {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    recent: VecDeque<Duration>,
    recent_window: usize,
}

impl OperationStats {
    fn new(recent_window: usize) -> Self {
        Self {
            count: 0,
            success_count: 0,
            error_count: 0,
            total_latency: Duration::ZERO,
            min_latency: Duration::MAX,
            max_latency: Duration::ZERO,
            recent: VecDeque::with_capacity(recent_window),
            recent_window,
        }
    }

    fn add(&mut self, latency: Duration, success: bool) {
        self.count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        self.total_latency += latency;
        self.min_latency = self.min_latency.min(latency);
        self.max_latency = self.max_latency.max(latency);

        if self.recent.len() >= self.recent_window {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.count as u32
        }
    }

    pub fn recent_average(&self) -> Duration {
        if self.recent.is_empty() {
            Duration::ZERO
        } else {
            self.recent.iter().sum::<Duration>() / self.recent.len() as u32
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            self.success_count as f64 / self.count as f64
        }
    }
}

/// A single point-in-time measurement, tagged for filtering. Mirrors the
/// original `PerformanceMetric` dataclass.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: SystemTime,
    pub tags: HashMap<String, String>,
}

/// Snapshot of the recorder's state at a point in time, returned by
/// [`OperationRecorder::snapshot`].
#[derive(Debug, Clone)]
pub struct RecorderSnapshot {
    pub stats: HashMap<String, OperationStats>,
    pub events: Vec<MetricEvent>,
}

/// C2's central collaborator: a concurrent per-operation stats table plus a
/// retained, size-bounded event log, optionally fed by a background OS
/// sampler.
pub struct OperationRecorder {
    stats: DashMap<String, OperationStats>,
    events: tokio::sync::Mutex<VecDeque<MetricEvent>>,
    config: MetricsConfig,
    shutdown: Arc<AtomicBool>,
    sampler: tokio::sync::Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl OperationRecorder {
    pub fn new(config: MetricsConfig) -> Arc<Self> {
        Arc::new(Self {
            stats: DashMap::new(),
            events: tokio::sync::Mutex::new(VecDeque::new()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            sampler: tokio::sync::Mutex::new(None),
        })
    }

    /// Records one completed operation's latency and outcome.
    pub fn record(&self, op_name: &str, latency: Duration, success: bool) {
        let mut entry = self
            .stats
            .entry(op_name.to_string())
            .or_insert_with(|| OperationStats::new(self.config.recent_window));
        entry.add(latency, success);
    }

    /// Appends a point-in-time event, enforcing the configured retention
    /// window and size cap.
    pub async fn emit(&self, name: impl Into<String>, value: f64, unit: impl Into<String>, tags: HashMap<String, String>) {
        let mut events = self.events.lock().await;
        events.push_back(MetricEvent {
            name: name.into(),
            value,
            unit: unit.into(),
            timestamp: SystemTime::now(),
            tags,
        });

        let cutoff = SystemTime::now()
            .checked_sub(self.config.retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        while events.front().map(|e| e.timestamp < cutoff).unwrap_or(false) {
            events.pop_front();
        }
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }

    /// Starts a RAII timer for `op_name`. Call [`ScopedTimer::success`] on
    /// the happy path; dropping without calling it records the span as a
    /// failure, matching "failure = an error propagated through the scope".
    pub fn scoped_timer<'a>(self: &'a Arc<Self>, op_name: impl Into<String>) -> ScopedTimer<'a> {
        ScopedTimer {
            recorder: self,
            name: op_name.into(),
            start: Instant::now(),
            outcome: std::cell::Cell::new(false),
        }
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        let stats = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let events = self
            .events
            .try_lock()
            .map(|guard| guard.iter().cloned().collect())
            .unwrap_or_default();
        RecorderSnapshot { stats, events }
    }

    pub fn reset(&self) {
        self.stats.clear();
        if let Ok(mut events) = self.events.try_lock() {
            events.clear();
        }
    }

    /// Starts the background OS sampler. Explicit, not run from the
    /// constructor, so the root controls background-task lifetime. A
    /// no-op if metrics are disabled in config, or already running.
    pub async fn spawn_sampler(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut guard = self.sampler.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let recorder = self.clone();
        let interval = self.config.sample_interval;

        let handle = tokio::spawn(async move {
            let mut system = System::new_all();
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = recorder.sample_once(&mut system).await {
                            warn!(error = %err, "recorder sampler tick failed, continuing");
                        }
                    }
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

    async fn sample_once(&self, system: &mut System) -> Result<(), String> {
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks();
        system.refresh_networks();

        let cpu = system.global_cpu_info().cpu_usage() as f64;
        self.emit("system.cpu_usage", cpu, "percent", HashMap::new()).await;

        let mem_used = system.used_memory() as f64;
        self.emit("system.memory_used", mem_used, "kilobytes", HashMap::new()).await;

        let disk_used: u64 = system
            .disks()
            .iter()
            .map(|d| d.total_space().saturating_sub(d.available_space()))
            .sum();
        self.emit("system.disk_used", disk_used as f64, "bytes", HashMap::new()).await;

        let (rx, tx) = system
            .networks()
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });
        self.emit("system.network_received", rx as f64, "bytes", HashMap::new()).await;
        self.emit("system.network_transmitted", tx as f64, "bytes", HashMap::new()).await;

        Ok(())
    }

    /// Stops the background sampler and awaits its termination. Idempotent.
    pub async fn stop_sampler(&self) {
        let handle = self.sampler.lock().await.take();
        if let Some((handle, tx)) = handle {
            let _ = tx.send(true);
            let _ = handle.await;
        }
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// RAII guard returned by [`OperationRecorder::scoped_timer`]. Records
/// elapsed wall-time and an outcome when dropped.
pub struct ScopedTimer<'a> {
    recorder: &'a Arc<OperationRecorder>,
    name: String,
    start: Instant,
    outcome: std::cell::Cell<bool>,
}

impl<'a> ScopedTimer<'a> {
    /// Marks this span as successful. Call on the happy path before the
    /// guard drops.
    pub fn success(&self) {
        self.outcome.set(true);
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        self.recorder.record(&self.name, self.start.elapsed(), self.outcome.get());
    }
}

static PROCESS_RECORDER: OnceLock<Arc<OperationRecorder>> = OnceLock::new();

/// Thin, optional process-level accessor. Convenience only: every
/// constructor in this crate takes a recorder capability explicitly, and
/// nothing in the crate forces use of this global.
pub fn process_recorder() -> Arc<OperationRecorder> {
    PROCESS_RECORDER
        .get_or_init(|| OperationRecorder::new(MetricsConfig::default()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_count_and_success_rate() {
        let mut stats = OperationStats::new(100);
        stats.add(Duration::from_millis(10), true);
        stats.add(Duration::from_millis(20), false);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.success_rate(), 0.5);
        assert_eq!(stats.min_latency, Duration::from_millis(10));
        assert_eq!(stats.max_latency, Duration::from_millis(20));
    }

    #[test]
    fn recent_window_is_bounded() {
        let mut stats = OperationStats::new(3);
        for ms in [1, 2, 3, 4, 5] {
            stats.add(Duration::from_millis(ms), true);
        }
        assert_eq!(stats.recent.len(), 3);
        assert_eq!(stats.count, 5);
    }

    #[tokio::test]
    async fn scoped_timer_records_failure_by_default() {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        {
            let _timer = recorder.scoped_timer("op.test");
        }
        let snapshot = recorder.snapshot();
        let stats = snapshot.stats.get("op.test").unwrap();
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test]
    async fn scoped_timer_records_success_when_marked() {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        {
            let timer = recorder.scoped_timer("op.test");
            timer.success();
        }
        let snapshot = recorder.snapshot();
        let stats = snapshot.stats.get("op.test").unwrap();
        assert_eq!(stats.success_count, 1);
    }

    #[tokio::test]
    async fn reset_clears_stats_and_events() {
        let recorder = OperationRecorder::new(MetricsConfig::default());
        recorder.record("op.test", Duration::from_millis(5), true);
        recorder.emit("metric", 1.0, "unit", HashMap::new()).await;
        recorder.reset();
        let snapshot = recorder.snapshot();
        assert!(snapshot.stats.is_empty());
        assert!(snapshot.events.is_empty());
    }
}
