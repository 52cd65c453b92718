//! # kairos-runtime
//!
//! An async browser-automation orchestration runtime: a pool of live,
//! authenticatable browser sessions, a concurrent task dispatcher that
//! fans work out across leased sessions, and an operation recorder that
//! tracks latency/throughput and samples host OS metrics in the
//! background.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kairos_runtime::{ResourceRoot, RuntimeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let root = ResourceRoot::unauthenticated(RuntimeConfig::default()).await;
//!
//!     let lease = root.manager.with_lease(None).await.unwrap();
//!     lease.browser.navigate("https://example.com").await.unwrap();
//!     lease.release().await;
//!
//!     root.shutdown().await;
//! }
//! ```
//!
//! ## Layout
//!
//! - [`error`] — the crate's single [`error::RuntimeError`] type, plus the
//!   carried circuit breaker.
//! - [`config`] — immutable, serde-round-trippable configuration.
//! - [`timing`] — bounded waits, exponential-backoff retry, smart delays.
//! - [`recorder`] — per-operation stats, a retained event log, and the
//!   background OS sampler.
//! - [`interceptor`] — optional, off-by-default ad/tracker request blocking.
//! - [`browser`] — the `BrowserEngine` collaborator trait and its
//!   `chromiumoxide`-backed implementation, wrapped in a uniformly
//!   instrumented [`browser::BrowserHandle`].
//! - [`session`] — the pooled session record and its identity/principal
//!   types.
//! - [`pool`] — the session pool and its RAII [`pool::Lease`].
//! - [`manager`] — scoped (optionally authenticated) session acquisition.
//! - [`dispatcher`] — concurrent, cancellable, order-preserving fan-out.
//! - [`http_pool`] — the HTTP side-channel connection pool.
//! - [`root`] — [`root::ResourceRoot`], composing all of the above with a
//!   single idempotent shutdown sequence.

pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http_pool;
pub mod interceptor;
pub mod manager;
pub mod pool;
pub mod recorder;
pub mod root;
pub mod session;
pub mod timing;


pub use browser::{BrowserEngine, BrowserHandle, ChromiumEngine, WaitCondition};
pub use config::{BrowserLaunchConfig, HttpConfig, MetricsConfig, OperationKind, PoolConfig, RuntimeConfig, TimingConfig};
pub use dispatcher::{fan_out, CancelSource, CancelToken, JobOutcome};
pub use error::{CircuitBreaker, CircuitState, ErrorSeverity, RuntimeError};
pub use http_pool::HttpPool;
pub use interceptor::RequestInterceptor;
pub use manager::{Authenticator, NoopAuthenticator, SessionManager};
pub use pool::{ChromiumSessionFactory, Lease, PoolStats, SessionFactory, SessionPool};
pub use recorder::{process_recorder, MetricEvent, OperationRecorder, OperationStats, RecorderSnapshot, ScopedTimer};
pub use root::ResourceRoot;
pub use session::{Credential, Principal, Session, SessionId};
