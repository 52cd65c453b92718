//! Optional, off-by-default pre-navigation request filtering.
//!
//! Carried from the teacher's `utils.rs` `RequestInterceptor` almost
//! verbatim (§5 of `SPEC_FULL.md`): an ambient browser-launch convenience,
//! not part of the C3 contract. `BrowserHandle::navigate` consults it only
//! when a caller opts a session into one via `ChromiumEngine::launch`.

use std::collections::HashSet;

use url::Url;

#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    pub block_ads: bool,
    pub block_trackers: bool,
    pub blocked_domains: HashSet<String>,
}

impl RequestInterceptor {
    pub fn new() -> Self {
        let mut blocked_domains = HashSet::new();
        for domain in [
            "googletagmanager.com",
            "googlesyndication.com",
            "doubleclick.net",
            "googleadservices.com",
            "google-analytics.com",
            "hotjar.com",
            "mixpanel.com",
            "segment.com",
        ] {
            blocked_domains.insert(domain.to_string());
        }

        Self {
            block_ads: true,
            block_trackers: true,
            blocked_domains,
        }
    }

    pub fn should_block(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(domain) = parsed.domain() else {
            return false;
        };

        if self.blocked_domains.contains(domain) {
            return true;
        }

        let lower = url.to_lowercase();
        if self.block_ads && Self::contains_ad_pattern(&lower) {
            return true;
        }
        if self.block_trackers && Self::contains_tracker_pattern(&lower) {
            return true;
        }

        false
    }

    fn contains_ad_pattern(url: &str) -> bool {
        const PATTERNS: &[&str] = &[
            "/ads/", "/ad/", "/advertisement/", "googleads", "googlesyndication", "doubleclick", "adnxs",
        ];
        PATTERNS.iter().any(|pattern| url.contains(pattern))
    }

    fn contains_tracker_pattern(url: &str) -> bool {
        const PATTERNS: &[&str] = &["analytics", "tracking", "telemetry", "hotjar", "mixpanel", "segment", "gtag"];
        PATTERNS.iter().any(|pattern| url.contains(pattern))
    }

    pub fn add_blocked_domain(&mut self, domain: impl Into<String>) {
        self.blocked_domains.insert(domain.into());
    }
}

impl Default for RequestInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_known_ad_domain() {
        let interceptor = RequestInterceptor::new();
        assert!(interceptor.should_block("https://doubleclick.net/pixel"));
    }

    #[test]
    fn allows_unrelated_domain() {
        let interceptor = RequestInterceptor::new();
        assert!(!interceptor.should_block("https://www.tradingview.com/chart"));
    }

    #[test]
    fn blocks_tracker_pattern_in_path() {
        let interceptor = RequestInterceptor::new();
        assert!(interceptor.should_block("https://cdn.example.com/analytics/collect"));
    }
}
