use std::time::Duration;

use thiserror::Error;

use crate::models::Technique;

/// Failure of a single transport attempt (one HTTP request).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Failure of a logical fetch, surfaced only after every bypass technique
/// the fetcher was allowed to try has been exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("blocked fetching {url} after {attempts} attempts (last technique: {last_technique})")]
    Blocked {
        url: String,
        last_technique: Technique,
        attempts: u32,
    },

    #[error("timed out fetching {url} via {technique}")]
    Timeout { url: String, technique: Technique },

    #[error("network error fetching {url}: {message}")]
    NetworkError { url: String, message: String },

    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Blocked { url, .. }
            | FetchError::Timeout { url, .. }
            | FetchError::NetworkError { url, .. }
            | FetchError::NotFound { url }
            | FetchError::InvalidUrl { url, .. } => url,
        }
    }

    /// Returns true if the caller may reasonably try the same fetch again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::NetworkError { .. } | FetchError::Blocked { .. }
        )
    }
}

/// Failure of a single search engine call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine '{engine}' fetch failed: {source}")]
    Fetch {
        engine: String,
        #[source]
        source: FetchError,
    },

    #[error("engine '{engine}' timed out after {}ms", .after.as_millis())]
    Timeout { engine: String, after: Duration },

    #[error("engine '{engine}' returned an unparsable page: {message}")]
    Parse { engine: String, message: String },

    #[error("engine '{engine}' is unavailable: circuit open, retry after {}s", .retry_after.as_secs())]
    Unavailable { engine: String, retry_after: Duration },
}

impl EngineError {
    pub fn engine(&self) -> &str {
        match self {
            EngineError::Fetch { engine, .. }
            | EngineError::Timeout { engine, .. }
            | EngineError::Parse { engine, .. }
            | EngineError::Unavailable { engine, .. } => engine,
        }
    }
}

/// Errors that feed a circuit breaker implement this to decide whether a
/// failure counts against the protected service.
pub trait TripSignal {
    /// Returns true if this error should trip the circuit breaker.
    fn should_trip_circuit(&self) -> bool;

    /// Returns true if this error indicates the service is rate limiting us.
    fn is_rate_limit(&self) -> bool {
        false
    }
}

impl TripSignal for EngineError {
    fn should_trip_circuit(&self) -> bool {
        match self {
            EngineError::Timeout { .. } | EngineError::Parse { .. } => true,
            EngineError::Fetch { source, .. } => !matches!(source, FetchError::InvalidUrl { .. }),
            EngineError::Unavailable { .. } => false,
        }
    }

    fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            EngineError::Fetch {
                source: FetchError::Blocked { .. },
                ..
            }
        )
    }
}

/// One engine that could not contribute to a search, and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EngineFailure {
    pub engine: String,
    pub reason: String,
}

impl std::fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.engine, self.reason)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("all search engines unavailable for '{query}' ({})", format_failures(.failures))]
    AllEnginesUnavailable {
        query: String,
        failures: Vec<EngineFailure>,
    },

    #[error("search for '{query}' exceeded its {}s deadline", .deadline.as_secs())]
    Timeout { query: String, deadline: Duration },

    #[error("search query is empty")]
    EmptyQuery,
}

fn format_failures(failures: &[EngineFailure]) -> String {
    if failures.is_empty() {
        return "no engines configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    #[error("root {url} is unreachable: {source}")]
    RootUnreachable {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("invalid root URL '{url}': {reason}")]
    InvalidRoot { url: String, reason: String },

    /// The deadline passed before the root page came back. Later deadlines
    /// end the run with a partial report instead.
    #[error("traversal from {url} exceeded its {}s deadline before the root was fetched", .deadline.as_secs())]
    Timeout { url: String, deadline: Duration },
}

/// Failure to open a message stream. Failures after the first message are
/// reported on the partial capture instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid stream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("connecting to {url} timed out after {}s", .after.as_secs())]
    Timeout { url: String, after: Duration },

    #[error("stream protocol error: {0}")]
    Protocol(String),
}

/// Why a pagination cursor was rejected. Never surfaced to callers of
/// `paginate`, which restart at the first page instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding,

    #[error("cursor payload is malformed: {0}")]
    Malformed(String),

    #[error("cursor checksum does not match its fields")]
    ChecksumMismatch,

    #[error("cursor expired {age_secs}s after creation")]
    Expired { age_secs: i64 },

    #[error("cursor timestamp lies in the future")]
    FromTheFuture,

    #[error("cursor filter signature does not match the current query")]
    FilterMismatch,
}

impl CursorError {
    /// Name of the cursor field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            CursorError::Encoding | CursorError::Malformed(_) => "payload",
            CursorError::ChecksumMismatch => "checksum",
            CursorError::Expired { .. } | CursorError::FromTheFuture => "timestamp",
            CursorError::FilterMismatch => "filter_signature",
        }
    }
}

/// Application-wide error types for Rival.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Traversal(#[from] TraversalError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// HTML-to-Markdown conversion failed.
    #[error("Cleaner error: {0}")]
    CleanerError(String),

    /// Link harvesting failed for a page.
    #[error("Link extraction error: {0}")]
    LinkExtraction(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Fetch(e) => e.is_retryable(),
            AppError::Search(SearchError::AllEnginesUnavailable { .. })
            | AppError::Search(SearchError::Timeout { .. }) => true,
            AppError::Traversal(TraversalError::RootUnreachable { source, .. }) => {
                source.is_retryable()
            }
            AppError::Traversal(TraversalError::Timeout { .. }) => true,
            AppError::Stream(StreamError::Connect { .. } | StreamError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(
            AppError::Fetch(FetchError::NetworkError {
                url: "https://example.com".into(),
                message: "reset".into(),
            })
            .is_retryable()
        );
        assert!(
            AppError::Fetch(FetchError::Timeout {
                url: "https://example.com".into(),
                technique: Technique::Direct,
            })
            .is_retryable()
        );
        assert!(
            !AppError::Fetch(FetchError::NotFound {
                url: "https://example.com/missing".into(),
            })
            .is_retryable()
        );
        assert!(!AppError::CleanerError("bad html".into()).is_retryable());
        assert!(!AppError::Search(SearchError::EmptyQuery).is_retryable());
        assert!(
            AppError::Stream(StreamError::Timeout {
                url: "wss://feed.example/".into(),
                after: Duration::from_secs(10),
            })
            .is_retryable()
        );
        assert!(
            !AppError::Stream(StreamError::InvalidUrl {
                url: "https://feed.example/".into(),
                reason: "not a ws:// or wss:// URL".into(),
            })
            .is_retryable()
        );
    }

    #[test]
    fn test_circuit_tripping() {
        let timeout = EngineError::Timeout {
            engine: "bing".into(),
            after: Duration::from_secs(5),
        };
        assert!(timeout.should_trip_circuit());

        let invalid = EngineError::Fetch {
            engine: "bing".into(),
            source: FetchError::InvalidUrl {
                url: "nope".into(),
                reason: "relative URL without a base".into(),
            },
        };
        assert!(!invalid.should_trip_circuit());

        let open = EngineError::Unavailable {
            engine: "bing".into(),
            retry_after: Duration::from_secs(30),
        };
        assert!(!open.should_trip_circuit());
    }

    #[test]
    fn test_blocked_engine_counts_as_rate_limit() {
        let blocked = EngineError::Fetch {
            engine: "duckduckgo".into(),
            source: FetchError::Blocked {
                url: "https://html.duckduckgo.com/html/?q=rust".into(),
                last_technique: Technique::ArchiveFallback,
                attempts: 6,
            },
        };
        assert!(blocked.should_trip_circuit());
        assert!(blocked.is_rate_limit());
    }

    #[test]
    fn test_all_engines_unavailable_lists_each_engine() {
        let err = SearchError::AllEnginesUnavailable {
            query: "rust".into(),
            failures: vec![
                EngineFailure {
                    engine: "duckduckgo".into(),
                    reason: "circuit open".into(),
                },
                EngineFailure {
                    engine: "bing".into(),
                    reason: "timed out".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("duckduckgo: circuit open"));
        assert!(msg.contains("bing: timed out"));
    }

    #[test]
    fn test_cursor_error_names_failing_field() {
        assert_eq!(CursorError::ChecksumMismatch.field(), "checksum");
        assert_eq!(CursorError::Expired { age_secs: 90_000 }.field(), "timestamp");
        assert_eq!(CursorError::FilterMismatch.field(), "filter_signature");
    }
}
