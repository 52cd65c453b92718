//! Runtime configuration.
//!
//! `RuntimeConfig` and its nested structs are plain data: they derive
//! `Serialize`/`Deserialize` so a caller can load them from wherever it
//! likes, but this crate never reads a file or an environment variable
//! itself — config-file parsing is a caller concern. Once passed to
//! `ResourceRoot::new`, a `RuntimeConfig` is not mutated again.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a [`crate::ResourceRoot`].
///
/// # Examples
///
/// ```rust
/// use kairos_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::default();
/// let config = RuntimeConfig {
///     pool: kairos_runtime::PoolConfig { max_size: 4, ..Default::default() },
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    pub pool: PoolConfig,
    pub http: HttpConfig,
    pub timing: TimingConfig,
    pub metrics: MetricsConfig,
    pub browser: BrowserLaunchConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            http: HttpConfig::default(),
            timing: TimingConfig::default(),
            metrics: MetricsConfig::default(),
            browser: BrowserLaunchConfig::default(),
        }
    }
}

/// Controls session-pool sizing and lifecycle thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Sessions the janitor keeps warm even when idle (default: 1).
    pub min_size: usize,

    /// Hard cap on live sessions; `acquire` blocks (subject to its own
    /// timeout) rather than exceed this (default: 8).
    pub max_size: usize,

    /// A session older than this is retired by the janitor, never handed
    /// out again (default: 2 hours).
    pub max_age: Duration,

    /// A session idle longer than this is retired by the janitor
    /// (default: 30 minutes).
    pub max_idle: Duration,

    /// A session with this many recorded errors is retired on release
    /// rather than returned to the pool (default: 5).
    pub max_errors: u32,

    /// How often the janitor sweeps for retirement and tops the pool back
    /// up to `min_size` (default: 5 minutes).
    pub janitor_interval: Duration,

    /// Default deadline for `acquire` when the caller doesn't specify one
    /// (default: 30 seconds).
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 8,
            max_age: Duration::from_secs(2 * 60 * 60),
            max_idle: Duration::from_secs(30 * 60),
            max_errors: 5,
            janitor_interval: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Controls the HTTP side-channel pool owned by the resource root.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    /// Maximum number of connections held open at once (default: 20).
    pub max_connections: usize,

    /// Idle connections kept warm for reuse (default: 5).
    pub max_keepalive: usize,

    /// How long an idle connection is kept before being closed
    /// (default: 5 minutes).
    pub keepalive_expiry: Duration,

    /// Per-request timeout (default: 30 seconds).
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            max_keepalive: 5,
            keepalive_expiry: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Identifies the kind of browser interaction a smart-delay is applied
/// after. Mirrors the original implementation's delay table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OperationKind {
    Click,
    Type,
    Navigate,
    Submit,
    Dropdown,
    Dialog,
    Api,
}

/// Controls C1's timing primitives: default wait budgets and the
/// per-operation smart-delay table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    /// Default timeout for element/condition waits (default: 30 seconds).
    pub default_wait: Duration,

    /// Timeout for a full page-load wait (default: 60 seconds).
    pub page_load_timeout: Duration,

    /// Base delay used by `retry`'s exponential backoff (default: 1 second).
    pub retry_base_delay: Duration,

    /// Cap on `retry`'s backoff delay (default: 10 seconds).
    pub retry_max_delay: Duration,

    /// Max attempts `retry` spends before giving up (default: 3).
    pub retry_max_attempts: usize,

    /// Small settle delay applied after an interaction, keyed by kind.
    pub smart_delay: HashMap<OperationKind, Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let mut smart_delay = HashMap::new();
        smart_delay.insert(OperationKind::Click, Duration::from_millis(500));
        smart_delay.insert(OperationKind::Type, Duration::from_millis(100));
        smart_delay.insert(OperationKind::Navigate, Duration::from_secs(2));
        smart_delay.insert(OperationKind::Submit, Duration::from_secs(1));
        smart_delay.insert(OperationKind::Dropdown, Duration::from_millis(300));
        smart_delay.insert(OperationKind::Dialog, Duration::from_millis(500));
        smart_delay.insert(OperationKind::Api, Duration::from_millis(200));

        Self {
            default_wait: Duration::from_secs(30),
            page_load_timeout: Duration::from_secs(60),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            retry_max_attempts: 3,
            smart_delay,
        }
    }
}

/// Controls C2's operation recorder: retention and background sampling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether the background OS sampler is started at all (default: true).
    pub enabled: bool,

    /// How long a `MetricEvent` is retained before it ages out
    /// (default: 24 hours).
    pub retention: Duration,

    /// Hard cap on retained events regardless of age (default: 10_000).
    pub max_events: usize,

    /// How often the background sampler emits OS-level events
    /// (default: 60 seconds).
    pub sample_interval: Duration,

    /// Recent-latency samples kept per operation for the "recent average"
    /// (default: 100, matching the original implementation's deque).
    pub recent_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: Duration::from_secs(24 * 60 * 60),
            max_events: 10_000,
            sample_interval: Duration::from_secs(60),
            recent_window: 100,
        }
    }
}

/// Controls how `ChromiumEngine` launches a browser process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserLaunchConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub chrome_path: Option<String>,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            chrome_path: None,
            user_agent: None,
            extra_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert!(config.pool.max_size >= config.pool.min_size);
        assert!(config.pool.max_size > 0);
        assert!(config.timing.retry_max_attempts > 0);
        assert_eq!(config.timing.smart_delay.len(), 7);
    }

    #[test]
    fn round_trips_through_json() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let restored: RuntimeConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.pool.max_size, config.pool.max_size);
        assert_eq!(restored.timing.smart_delay.len(), config.timing.smart_delay.len());
    }
}
