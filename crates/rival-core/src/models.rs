use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sha2::{Digest, Sha256};

/// The bypass technique that produced a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Direct,
    RotatedUserAgent,
    RotatedProxy,
    ArchiveFallback,
}

impl Technique {
    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Direct => "direct",
            Technique::RotatedUserAgent => "rotated_user_agent",
            Technique::RotatedProxy => "rotated_proxy",
            Technique::ArchiveFallback => "archive_fallback",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request overrides for a logical fetch. Unset fields fall back to the
/// fetcher's configuration.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Timeout for each individual attempt.
    pub timeout: Option<Duration>,
    /// Cap on total attempts across all techniques.
    pub max_attempts: Option<u32>,
    /// Deadline for the whole operation, including backoff sleeps.
    pub deadline: Option<Duration>,
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The outcome of a successful fetch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FetchResult {
    /// The URL the caller asked for.
    pub url: String,
    /// The URL the body was actually served from (after redirects or archive rewriting).
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub technique: Technique,
    pub attempts: u32,
    pub latency_ms: u64,
}

/// Clean structured text produced by the extraction pipeline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExtractedContent {
    pub url: String,
    pub title: Option<String>,
    /// Single-spaced plain text.
    pub text: String,
    /// Flat markdown of the winning candidate.
    pub markdown: String,
    /// Identifier of the strategy that produced this content.
    pub method: String,
    pub confidence: f32,
    /// True when no strategy cleared the acceptance threshold.
    pub degraded: bool,
    /// Absolute outgoing links, in document order.
    #[serde(default)]
    pub links: Vec<String>,
}

impl ExtractedContent {
    /// An empty result for input nothing could be extracted from.
    pub fn empty(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            text: String::new(),
            markdown: String::new(),
            method: method.into(),
            confidence: 0.0,
            degraded: true,
            links: Vec::new(),
        }
    }
}

/// One organic result from a search engine, after merging.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResult {
    pub title: String,
    /// Canonicalized URL; the deduplication key.
    pub url: String,
    pub snippet: String,
    /// Name of the engine that returned this result.
    pub source: String,
    /// 1-based rank within the source engine's response.
    pub rank: u32,
    #[serde(default)]
    pub featured_snippet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_traffic: Option<u64>,
    /// 1-based position in the merged list.
    #[serde(default)]
    pub position: u32,
}

/// Caller-facing search options.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_search_count")]
    pub count: usize,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// When false only the primary engine is consulted.
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

fn default_search_count() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            count: default_search_count(),
            language: None,
            region: None,
            enable_fallback: true,
        }
    }
}

/// What a single engine is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub count: usize,
    pub language: Option<String>,
    pub region: Option<String>,
}

impl SearchQuery {
    pub fn new(text: &str, options: &SearchOptions) -> Self {
        Self {
            text: text.trim().to_string(),
            count: options.count,
            language: options.language.clone(),
            region: options.region.clone(),
        }
    }
}

/// Prioritization policy for a traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
    /// Plain breadth-first order.
    #[default]
    Research,
    /// Documentation-like paths first.
    Docs,
    /// Spread across site sections, shallow paths first.
    Map,
}

impl fmt::Display for TraversalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraversalMode::Research => write!(f, "research"),
            TraversalMode::Docs => write!(f, "docs"),
            TraversalMode::Map => write!(f, "map"),
        }
    }
}

impl FromStr for TraversalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Ok(TraversalMode::Research),
            "docs" => Ok(TraversalMode::Docs),
            "map" => Ok(TraversalMode::Map),
            other => Err(format!(
                "unknown traversal mode '{other}' (expected research, docs or map)"
            )),
        }
    }
}

/// Input for a traversal run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TraversalRequest {
    pub root_url: String,
    #[serde(default)]
    pub mode: TraversalMode,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_true")]
    pub same_domain_only: bool,
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> usize {
    5
}

impl TraversalRequest {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into(),
            mode: TraversalMode::default(),
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            same_domain_only: true,
        }
    }
}

/// A page collected during traversal.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TraversedPage {
    pub url: String,
    pub depth: u32,
    pub content: ExtractedContent,
}

/// A node that was fetched but could not be collected.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FailedNode {
    pub url: String,
    pub depth: u32,
    pub reason: String,
}

/// Everything a traversal run produced.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraversalReport {
    pub root_url: String,
    pub mode: TraversalMode,
    pub pages: Vec<TraversedPage>,
    pub failed: Vec<FailedNode>,
    pub max_depth_reached: u32,
    /// Number of fetches issued, successful or not.
    pub fetches: usize,
    /// The run deadline cut the traversal short.
    pub timed_out: bool,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
