use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, EngineError, FetchError, StreamError, TransportError};
use crate::models::{ExtractedContent, FetchOptions, FetchResult, SearchQuery, SearchResult};

/// A single outbound HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub user_agent: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// What the wire returned for one attempt, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
}

/// Performs one HTTP GET. Implementations do not retry.
pub trait Transport: Send + Sync + Clone {
    fn send(
        &self,
        request: &TransportRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// Retrieves one resource, applying whatever resilience the implementation owns.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> impl Future<Output = Result<FetchResult, FetchError>> + Send;
}

/// Converts raw HTML into clean Markdown text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

/// Turns a fetched page into structured text.
pub trait Extractor: Send + Sync + Clone {
    /// Never fails; poor input yields low-confidence, degraded content.
    fn extract(&self, page: &FetchResult) -> ExtractedContent;

    /// Absolute outgoing links of the page, in document order.
    fn extract_links(&self, page: &FetchResult) -> Result<Vec<String>, AppError>;
}

/// One search backend. Object-safe so the orchestrator can hold a
/// heterogeneous, ordered chain of engines.
#[async_trait::async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, EngineError>;
}

/// Opens message streams (WebSocket feeds). Object-safe so the stream
/// retriever does not add a type parameter to everything that holds it.
#[async_trait::async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError>;
}

/// One open stream.
#[async_trait::async_trait]
pub trait StreamConnection: Send {
    /// The next data message, or `None` once the peer has closed.
    async fn next_message(&mut self) -> Result<Option<String>, StreamError>;

    /// Best-effort close handshake.
    async fn close(&mut self);
}
