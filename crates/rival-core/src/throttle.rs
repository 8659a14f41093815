//! Per-domain request throttling for polite fetching.
//!
//! Wraps any [`Fetcher`] with a per-domain delay so traversals that hit the
//! same host many times do not hammer it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rival_core::throttle::{ThrottledFetcher, ThrottleConfig};
//!
//! # fn wrap<F: rival_core::traits::Fetcher>(inner: F) {
//! let config = ThrottleConfig::new(Duration::from_secs(1))
//!     .with_jitter(Duration::from_millis(500));
//! let fetcher = ThrottledFetcher::new(inner, config);
//! # let _ = fetcher;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::backoff::rand_jitter_ms;
use crate::error::FetchError;
use crate::models::{FetchOptions, FetchResult};
use crate::traits::Fetcher;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl ThrottleConfig {
    /// Create a new config with the given per-domain delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// A [`Fetcher`] wrapper that enforces per-domain throttling.
///
/// Tracks the last request time per domain (scheme + host + port) and sleeps
/// before a new request if the minimum delay hasn't elapsed. Concurrent
/// callers are serialised per domain only.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the domain key from a URL (scheme://host:port).
    fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Reserves the next slot for `domain` and sleeps until it arrives.
    async fn wait_for_domain(&self, domain: &str) {
        let sleep_for = {
            let mut map = self.last_request.lock().await;
            let now = Instant::now();
            let slot = match map.get(domain) {
                Some(&last) => (last + self.config.effective_delay()).max(now),
                None => now,
            };
            map.insert(domain.to_string(), slot);
            slot.saturating_duration_since(now)
        };

        if !sleep_for.is_zero() {
            tracing::debug!(
                domain = %domain,
                sleep_ms = %sleep_for.as_millis(),
                "Throttling request"
            );
            tokio::time::sleep(sleep_for).await;
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult, FetchError> {
        if let Some(domain) = Self::domain_key(url) {
            self.wait_for_domain(&domain).await;
        }
        self.inner.fetch(url, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockSite;

    fn site() -> MockSite {
        MockSite::new()
            .page("http://example.com/page1", "<html>one</html>", &[])
            .page("http://example.com/page2", "<html>two</html>", &[])
            .page("http://other.com/page1", "<html>other</html>", &[])
    }

    #[test]
    fn domain_key_extracts_correctly() {
        assert_eq!(
            ThrottledFetcher::<MockSite>::domain_key("https://example.com/path?q=1"),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            ThrottledFetcher::<MockSite>::domain_key("http://example.com:8080/page"),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(ThrottledFetcher::<MockSite>::domain_key("not-a-url"), None);
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_enforces_delay_on_same_domain() {
        let fetcher = ThrottledFetcher::new(site(), ThrottleConfig::new(Duration::from_millis(100)));
        let opts = FetchOptions::default();

        let start = tokio::time::Instant::now();
        fetcher.fetch("http://example.com/page1", &opts).await.unwrap();
        fetcher.fetch("http://example.com/page2", &opts).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_does_not_delay_different_domains() {
        let fetcher = ThrottledFetcher::new(site(), ThrottleConfig::new(Duration::from_millis(200)));
        let opts = FetchOptions::default();

        let start = tokio::time::Instant::now();
        fetcher.fetch("http://example.com/page1", &opts).await.unwrap();
        fetcher.fetch("http://other.com/page1", &opts).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn throttle_passes_through_results_and_errors() {
        let fetcher = ThrottledFetcher::new(site(), ThrottleConfig::new(Duration::ZERO));
        let opts = FetchOptions::default();

        let ok = fetcher.fetch("http://other.com/page1", &opts).await.unwrap();
        assert_eq!(ok.body, "<html>other</html>");

        let err = fetcher.fetch("http://other.com/missing", &opts).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }
}
