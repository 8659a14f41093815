//! Shared user-agent and proxy rotation state.
//!
//! One registry is constructed per process and handed to every fetcher.
//! Counters advance under a short mutex; fairness across concurrent fetches
//! is eventual, not strict.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Proxies that failed this many times in a row are skipped.
pub const DEFAULT_MAX_PROXY_FAILURES: u32 = 2;

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.80",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

#[derive(Debug)]
struct RotationInner {
    next_user_agent: usize,
    next_proxy: usize,
    proxy_failures: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct RotationRegistry {
    user_agents: Arc<Vec<String>>,
    proxies: Arc<Vec<String>>,
    max_proxy_failures: u32,
    inner: Arc<Mutex<RotationInner>>,
}

impl RotationRegistry {
    /// An empty `user_agents` list falls back to [`DEFAULT_USER_AGENTS`].
    pub fn new(user_agents: Vec<String>, proxies: Vec<String>) -> Self {
        let user_agents = if user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            user_agents
        };
        Self {
            user_agents: Arc::new(user_agents),
            proxies: Arc::new(proxies),
            max_proxy_failures: DEFAULT_MAX_PROXY_FAILURES,
            inner: Arc::new(Mutex::new(RotationInner {
                // Rotation starts past the default agent so the first retry differs.
                next_user_agent: 1,
                next_proxy: 0,
                proxy_failures: HashMap::new(),
            })),
        }
    }

    pub fn with_max_proxy_failures(mut self, max: u32) -> Self {
        self.max_proxy_failures = max.max(1);
        self
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, RotationInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rotation registry mutex");
            poisoned.into_inner()
        })
    }

    /// The agent used for direct attempts.
    pub fn default_user_agent(&self) -> &str {
        self.user_agents.first().map(String::as_str).unwrap_or_default()
    }

    pub fn next_user_agent(&self) -> String {
        let mut inner = self.lock_inner();
        let idx = inner.next_user_agent % self.user_agents.len().max(1);
        inner.next_user_agent = inner.next_user_agent.wrapping_add(1);
        self.user_agents.get(idx).cloned().unwrap_or_default()
    }

    pub fn has_proxies(&self) -> bool {
        !self.proxies.is_empty()
    }

    /// Next proxy in round-robin order, skipping unhealthy ones.
    /// `None` when no proxy is configured or all are unhealthy.
    pub fn next_proxy(&self) -> Option<String> {
        let mut inner = self.lock_inner();
        for _ in 0..self.proxies.len() {
            let idx = inner.next_proxy % self.proxies.len();
            inner.next_proxy = inner.next_proxy.wrapping_add(1);
            let proxy = &self.proxies[idx];
            let failures = inner.proxy_failures.get(proxy).copied().unwrap_or(0);
            if failures < self.max_proxy_failures {
                return Some(proxy.clone());
            }
        }
        None
    }

    pub fn record_proxy_failure(&self, proxy: &str) {
        let mut inner = self.lock_inner();
        let failures = inner.proxy_failures.entry(proxy.to_string()).or_insert(0);
        *failures += 1;
        if *failures == self.max_proxy_failures {
            tracing::warn!(proxy = %proxy, failures = *failures, "Proxy marked unhealthy");
        }
    }

    pub fn record_proxy_success(&self, proxy: &str) {
        self.lock_inner().proxy_failures.remove(proxy);
    }

    pub fn healthy_proxy_count(&self) -> usize {
        let inner = self.lock_inner();
        self.proxies
            .iter()
            .filter(|p| inner.proxy_failures.get(*p).copied().unwrap_or(0) < self.max_proxy_failures)
            .count()
    }
}

impl Default for RotationRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://proxy{i}:8080")).collect()
    }

    #[test]
    fn empty_agent_list_uses_defaults() {
        let reg = RotationRegistry::default();
        assert_eq!(reg.default_user_agent(), DEFAULT_USER_AGENTS[0]);
        assert!(!reg.has_proxies());
        assert_eq!(reg.next_proxy(), None);
    }

    #[test]
    fn user_agents_rotate_past_the_default() {
        let reg = RotationRegistry::new(vec!["a".into(), "b".into(), "c".into()], vec![]);
        assert_eq!(reg.default_user_agent(), "a");
        assert_eq!(reg.next_user_agent(), "b");
        assert_eq!(reg.next_user_agent(), "c");
        assert_eq!(reg.next_user_agent(), "a");
    }

    #[test]
    fn proxies_round_robin() {
        let reg = RotationRegistry::new(vec![], proxies(2));
        assert_eq!(reg.next_proxy().as_deref(), Some("http://proxy0:8080"));
        assert_eq!(reg.next_proxy().as_deref(), Some("http://proxy1:8080"));
        assert_eq!(reg.next_proxy().as_deref(), Some("http://proxy0:8080"));
    }

    #[test]
    fn proxy_skipped_after_two_failures() {
        let reg = RotationRegistry::new(vec![], proxies(2));
        reg.record_proxy_failure("http://proxy0:8080");
        assert_eq!(reg.healthy_proxy_count(), 2);
        reg.record_proxy_failure("http://proxy0:8080");
        assert_eq!(reg.healthy_proxy_count(), 1);

        for _ in 0..4 {
            assert_eq!(reg.next_proxy().as_deref(), Some("http://proxy1:8080"));
        }
    }

    #[test]
    fn all_proxies_unhealthy_yields_none() {
        let reg = RotationRegistry::new(vec![], proxies(1));
        reg.record_proxy_failure("http://proxy0:8080");
        reg.record_proxy_failure("http://proxy0:8080");
        assert_eq!(reg.next_proxy(), None);

        reg.record_proxy_success("http://proxy0:8080");
        assert_eq!(reg.next_proxy().as_deref(), Some("http://proxy0:8080"));
    }

    #[test]
    fn clones_share_counters() {
        let reg = RotationRegistry::new(vec!["a".into(), "b".into()], vec![]);
        let other = reg.clone();
        assert_eq!(reg.next_user_agent(), "b");
        assert_eq!(other.next_user_agent(), "a");
    }
}
