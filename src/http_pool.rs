//! The HTTP side-channel pool owned by C8.
//!
//! Grounded on the original implementation's `ConnectionPool`
//! (`tv/core/session_manager.py`, an `aiohttp.TCPConnector` wrapper),
//! translated to `reqwest`'s own connection-pool builder — the ecosystem's
//! idiomatic keep-alive pool — rather than hand-rolling a semaphore gate
//! the way the teacher's generic `utils.rs` `ConnectionPool` does for a
//! different purpose (bounding concurrent screenshot captures, not HTTP
//! keep-alive).

use crate::config::HttpConfig;

/// Thin wrapper around a `reqwest::Client` built from [`HttpConfig`].
/// Exists mainly so [`crate::root::ResourceRoot`] has a single named
/// collaborator to own and tear down, rather than a bare `reqwest::Client`
/// threaded through construction.
pub struct HttpPool {
    client: reqwest::Client,
}

impl HttpPool {
    pub fn new(config: &HttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_keepalive)
            .pool_idle_timeout(config.keepalive_expiry)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// `reqwest::Client` has no explicit close/shutdown; dropping the last
    /// clone tears down its connection pool. This exists so `ResourceRoot`
    /// has a symmetrical teardown step to call even though it's a no-op
    /// today, matching the original's `ResourceManager.__aexit__` sequencing
    /// `session_manager.shutdown()` then `connection_pool.close()`.
    pub async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_config() {
        let pool = HttpPool::new(&HttpConfig::default());
        assert!(pool.client().get("https://example.com").build().is_ok());
    }
}
