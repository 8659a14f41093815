use std::str::FromStr;
use std::time::Duration;

use crate::bypass::BypassConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::pagination::PaginationConfig;
use crate::search::SearchConfig;
use crate::stream::StreamConfig;
use crate::traverse::TraversalConfig;

/// Default confidence a strategy must reach before the pipeline stops.
pub const DEFAULT_EXTRACTION_THRESHOLD: f32 = 0.6;

/// Runtime configuration assembled from `RIVAL_*` environment variables.
#[derive(Debug, Clone)]
pub struct RivalConfig {
    pub bypass: BypassConfig,
    pub user_agents: Vec<String>,
    pub proxies: Vec<String>,
    /// Lets the HTTP transport reach private and loopback addresses.
    pub allow_private_urls: bool,
    pub extraction_threshold: f32,
    pub breaker: CircuitBreakerConfig,
    pub search: SearchConfig,
    pub traversal: TraversalConfig,
    pub pagination: PaginationConfig,
    pub stream: StreamConfig,
    /// Key for cursor checksums.
    pub cursor_secret: String,
}

impl RivalConfig {
    /// Read configuration from the process environment.
    ///
    /// Every variable is optional:
    ///
    /// - `RIVAL_FETCH_TIMEOUT_SECS` per-attempt timeout (15)
    /// - `RIVAL_MAX_UA_ATTEMPTS` / `RIVAL_MAX_PROXY_ATTEMPTS` (2 / 2)
    /// - `RIVAL_PROXIES` comma-separated proxy URLs
    /// - `RIVAL_USER_AGENTS` `|`-separated user agent strings
    /// - `RIVAL_ARCHIVES` comma-separated mirror prefixes
    /// - `RIVAL_ALLOW_PRIVATE_URLS` (false)
    /// - `RIVAL_EXTRACTION_THRESHOLD` in `[0, 1]` (0.6)
    /// - `RIVAL_BREAKER_FAILURES`, `RIVAL_BREAKER_WINDOW_SECS`, `RIVAL_BREAKER_COOLDOWN_SECS` (3, 60, 30)
    /// - `RIVAL_ENGINE_TIMEOUT_SECS` (10)
    /// - `RIVAL_TRAVERSAL_WORKERS`, `RIVAL_TRAVERSAL_DEADLINE_SECS` (4, 120)
    /// - `RIVAL_STREAM_MAX_CHUNKS`, `RIVAL_STREAM_IDLE_SECS` (10, 5)
    /// - `RIVAL_CURSOR_SECRET` (random per process when unset)
    /// - `RIVAL_CURSOR_TTL_SECS` (86400)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut bypass = BypassConfig::default();
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_FETCH_TIMEOUT_SECS")? {
            bypass.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_value::<u32>(&get, "RIVAL_MAX_UA_ATTEMPTS")? {
            bypass.max_ua_attempts = n;
        }
        if let Some(n) = parse_value::<u32>(&get, "RIVAL_MAX_PROXY_ATTEMPTS")? {
            bypass.max_proxy_attempts = n;
        }
        if let Some(raw) = get("RIVAL_ARCHIVES") {
            bypass.archives = split_list(&raw, ',');
        }

        let proxies = get("RIVAL_PROXIES")
            .map(|raw| split_list(&raw, ','))
            .unwrap_or_default();
        let user_agents = get("RIVAL_USER_AGENTS")
            .map(|raw| split_list(&raw, '|'))
            .unwrap_or_default();

        let allow_private_urls = match get("RIVAL_ALLOW_PRIVATE_URLS") {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid RIVAL_ALLOW_PRIVATE_URLS '{raw}': must be true or false"
                ))
            })?,
        };

        let extraction_threshold = match parse_value::<f32>(&get, "RIVAL_EXTRACTION_THRESHOLD")? {
            None => DEFAULT_EXTRACTION_THRESHOLD,
            Some(t) if (0.0..=1.0).contains(&t) => t,
            Some(t) => {
                return Err(AppError::ConfigError(format!(
                    "RIVAL_EXTRACTION_THRESHOLD must be between 0 and 1, got {t}"
                )));
            }
        };

        let mut breaker = CircuitBreakerConfig::default();
        if let Some(n) = parse_positive::<u32>(&get, "RIVAL_BREAKER_FAILURES")? {
            breaker.failure_threshold = n;
        }
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_BREAKER_WINDOW_SECS")? {
            breaker.failure_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_BREAKER_COOLDOWN_SECS")? {
            breaker.recovery_timeout = Duration::from_secs(secs);
            breaker.max_recovery_timeout = breaker.max_recovery_timeout.max(breaker.recovery_timeout);
        }

        let mut search = SearchConfig::default();
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_ENGINE_TIMEOUT_SECS")? {
            search.engine_timeout = Duration::from_secs(secs);
        }

        let mut traversal = TraversalConfig::default();
        if let Some(n) = parse_positive::<usize>(&get, "RIVAL_TRAVERSAL_WORKERS")? {
            traversal.workers = n;
        }
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_TRAVERSAL_DEADLINE_SECS")? {
            traversal.deadline = Duration::from_secs(secs);
        }

        let mut stream = StreamConfig::default();
        if let Some(n) = parse_positive::<usize>(&get, "RIVAL_STREAM_MAX_CHUNKS")? {
            stream.max_chunks = n;
        }
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_STREAM_IDLE_SECS")? {
            stream.idle_timeout = Duration::from_secs(secs);
        }

        let mut pagination = PaginationConfig::default();
        if let Some(secs) = parse_positive::<u64>(&get, "RIVAL_CURSOR_TTL_SECS")? {
            pagination.validity = Duration::from_secs(secs);
        }

        let cursor_secret = match get("RIVAL_CURSOR_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!(
                    "RIVAL_CURSOR_SECRET not set; cursors will not survive a restart"
                );
                uuid::Uuid::new_v4().to_string()
            }
        };

        Ok(Self {
            bypass,
            user_agents,
            proxies,
            allow_private_urls,
            extraction_threshold,
            breaker,
            search,
            traversal,
            pagination,
            stream,
            cursor_secret,
        })
    }
}

fn parse_value<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("Invalid {key} '{raw}': not a valid number"))),
    }
}

fn parse_positive<T: FromStr + PartialEq + Default>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match parse_value::<T>(get, key)? {
        Some(v) if v == T::default() => Err(AppError::ConfigError(format!(
            "{key} must be at least 1"
        ))),
        other => Ok(other),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<RivalConfig, AppError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RivalConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bypass.timeout, Duration::from_secs(15));
        assert_eq!(cfg.bypass.archives.len(), 2);
        assert!(cfg.proxies.is_empty());
        assert!(!cfg.allow_private_urls);
        assert_eq!(cfg.extraction_threshold, DEFAULT_EXTRACTION_THRESHOLD);
        assert_eq!(cfg.breaker.failure_threshold, 3);
        assert_eq!(cfg.traversal.workers, 4);
        assert!(!cfg.cursor_secret.is_empty());
    }

    #[test]
    fn reads_lists_and_numbers() {
        let cfg = config(&[
            ("RIVAL_PROXIES", "http://p1:8080, http://p2:8080,"),
            ("RIVAL_USER_AGENTS", "agent-a | agent-b"),
            ("RIVAL_ARCHIVES", "https://mirror.example/"),
            ("RIVAL_BREAKER_FAILURES", "5"),
            ("RIVAL_BREAKER_COOLDOWN_SECS", "600"),
            ("RIVAL_ALLOW_PRIVATE_URLS", "TRUE"),
            ("RIVAL_EXTRACTION_THRESHOLD", "0.75"),
            ("RIVAL_CURSOR_SECRET", "s3cret"),
            ("RIVAL_CURSOR_TTL_SECS", "3600"),
            ("RIVAL_STREAM_MAX_CHUNKS", "25"),
            ("RIVAL_STREAM_IDLE_SECS", "2"),
        ])
        .unwrap();

        assert_eq!(cfg.proxies, vec!["http://p1:8080", "http://p2:8080"]);
        assert_eq!(cfg.user_agents, vec!["agent-a", "agent-b"]);
        assert_eq!(cfg.bypass.archives, vec!["https://mirror.example/"]);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.breaker.recovery_timeout, Duration::from_secs(600));
        assert!(cfg.breaker.max_recovery_timeout >= cfg.breaker.recovery_timeout);
        assert!(cfg.allow_private_urls);
        assert_eq!(cfg.extraction_threshold, 0.75);
        assert_eq!(cfg.cursor_secret, "s3cret");
        assert_eq!(cfg.pagination.validity, Duration::from_secs(3600));
        assert_eq!(cfg.stream.max_chunks, 25);
        assert_eq!(cfg.stream.idle_timeout, Duration::from_secs(2));
    }

    #[test]
    fn rejects_invalid_values() {
        for vars in [
            [("RIVAL_FETCH_TIMEOUT_SECS", "soon")],
            [("RIVAL_TRAVERSAL_WORKERS", "0")],
            [("RIVAL_EXTRACTION_THRESHOLD", "1.5")],
            [("RIVAL_ALLOW_PRIVATE_URLS", "maybe")],
        ] {
            let err = config(&vars).unwrap_err();
            assert!(matches!(err, AppError::ConfigError(_)), "{vars:?} gave {err}");
        }
    }

    #[test]
    fn zero_ua_attempts_is_allowed() {
        let cfg = config(&[("RIVAL_MAX_UA_ATTEMPTS", "0")]).unwrap();
        assert_eq!(cfg.bypass.max_ua_attempts, 0);
    }
}
