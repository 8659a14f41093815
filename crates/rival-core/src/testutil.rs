//! Test utilities: handwritten mocks of the core traits.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability so clones share
//! state and tests can assert on recorded calls.

use std::collections::{HashMap, HashSet};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use crate::canonical::canonical_key;
use crate::error::{AppError, EngineError, FetchError, StreamError, TransportError};
use crate::models::{ExtractedContent, FetchOptions, FetchResult, SearchQuery, SearchResult, Technique};
use crate::traits::{
    Cleaner, Extractor, Fetcher, RawResponse, SearchEngine, StreamConnection, StreamConnector, Transport,
    TransportRequest,
};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Builds an HTML response with the given status.
pub fn html_response(status: u16, body: &str) -> RawResponse {
    RawResponse {
        status,
        final_url: String::new(),
        content_type: Some("text/html; charset=utf-8".to_string()),
        body: body.to_string(),
    }
}

/// Transport that replays a queue of outcomes and records every request.
#[derive(Clone)]
pub struct MockTransport {
    /// Each call pops the first element; an empty queue yields a network error.
    responses: Arc<Mutex<Vec<Result<RawResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn with_responses(responses: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: &TransportRequest) -> Result<RawResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        match next {
            Some(Ok(mut response)) => {
                if response.final_url.is_empty() {
                    response.final_url = request.url.clone();
                }
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Network("no more mock responses".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSite
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct MockPage {
    body: String,
    links: Vec<String>,
}

/// An in-memory link graph acting as both [`Fetcher`] and [`Extractor`].
///
/// Pages are keyed by canonical URL; unknown URLs fetch as `NotFound`.
/// Links may be relative and are resolved against the page URL.
#[derive(Clone, Default)]
pub struct MockSite {
    pages: Arc<Mutex<HashMap<String, MockPage>>>,
    broken_links: Arc<Mutex<HashSet<String>>>,
    fetched: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, body: &str, links: &[&str]) -> Self {
        self.pages.lock().unwrap().insert(
            canonical_key(url),
            MockPage {
                body: body.to_string(),
                links: links.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }

    /// Link extraction fails for this page.
    pub fn broken_links(self, url: &str) -> Self {
        self.broken_links.lock().unwrap().insert(canonical_key(url));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Fetcher for MockSite {
    async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<FetchResult, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.lock().unwrap().get(&canonical_key(url)).cloned();
        match page {
            Some(page) => Ok(FetchResult {
                url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                body: page.body,
                content_type: Some("text/html".to_string()),
                technique: Technique::Direct,
                attempts: 1,
                latency_ms: 0,
            }),
            None => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
        }
    }
}

impl Extractor for MockSite {
    fn extract(&self, page: &FetchResult) -> ExtractedContent {
        ExtractedContent {
            url: page.url.clone(),
            title: None,
            text: page.body.clone(),
            markdown: page.body.clone(),
            method: "mock".to_string(),
            confidence: 0.9,
            degraded: false,
            links: Vec::new(),
        }
    }

    fn extract_links(&self, page: &FetchResult) -> Result<Vec<String>, AppError> {
        let key = canonical_key(&page.final_url);
        if self.broken_links.lock().unwrap().contains(&key) {
            return Err(AppError::LinkExtraction("mock failure".to_string()));
        }
        let base = Url::parse(&page.final_url).map_err(|e| AppError::LinkExtraction(e.to_string()))?;
        let links = self
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .map(|p| p.links.clone())
            .unwrap_or_default();
        Ok(links
            .iter()
            .filter_map(|l| base.join(l).ok())
            .map(|u| u.to_string())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ScriptedEngine
// ---------------------------------------------------------------------------

pub fn search_result(title: &str, url: &str, rank: u32) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: format!("About {title}"),
        source: String::new(),
        rank,
        featured_snippet: false,
        estimated_traffic: None,
        position: 0,
    }
}

/// Search engine replaying a script of responses and counting calls.
#[derive(Clone)]
pub struct ScriptedEngine {
    name: String,
    responses: Arc<Mutex<Vec<Result<Vec<SearchResult>, EngineError>>>>,
    repeat_last: bool,
    last: Arc<Mutex<Option<Result<Vec<SearchResult>, EngineError>>>>,
    hang: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    /// An engine with an empty script: every call returns no results.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: Arc::new(Mutex::new(Vec::new())),
            repeat_last: false,
            last: Arc::new(Mutex::new(None)),
            hang: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An engine that never answers.
    pub fn hanging(name: &str) -> Self {
        Self {
            hang: true,
            ..Self::new(name)
        }
    }

    pub fn respond(self, results: Vec<SearchResult>) -> Self {
        self.responses.lock().unwrap().push(Ok(results));
        self
    }

    pub fn fail(self, error: EngineError) -> Self {
        self.responses.lock().unwrap().push(Err(error));
        self
    }

    /// Once the script runs out, keep replaying its final entry.
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SearchEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        match next {
            Some(outcome) => {
                *self.last.lock().unwrap() = Some(outcome.clone());
                outcome
            }
            None if self.repeat_last => self.last.lock().unwrap().clone().unwrap_or(Ok(Vec::new())),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Cleaner that returns its input unchanged, or a preset error once.
#[derive(Clone)]
pub struct MockCleaner {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockCleaner {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut err = self.error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        Ok(html.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockStream
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum StreamTail {
    Close,
    Fail(String),
    Hang,
}

/// A scripted stream: some messages, then a close, an error or silence.
#[derive(Clone)]
pub struct MockStream {
    messages: VecDeque<String>,
    tail: StreamTail,
    closed: Arc<AtomicBool>,
}

impl MockStream {
    pub fn messages(messages: &[&str]) -> Self {
        Self {
            messages: messages.iter().map(|m| m.to_string()).collect(),
            tail: StreamTail::Close,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.tail = StreamTail::Fail(message.to_string());
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.tail = StreamTail::Hang;
        self
    }
}

#[async_trait::async_trait]
impl StreamConnection for MockStream {
    async fn next_message(&mut self) -> Result<Option<String>, StreamError> {
        if let Some(message) = self.messages.pop_front() {
            return Ok(Some(message));
        }
        match &self.tail {
            StreamTail::Close => Ok(None),
            StreamTail::Fail(message) => Err(StreamError::Protocol(message.clone())),
            StreamTail::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out a fresh copy of its [`MockStream`] on every connect.
#[derive(Clone)]
pub struct MockStreamConnector {
    stream: MockStream,
    refuse: Option<String>,
    connect_delay: Option<Duration>,
    connects: Arc<AtomicUsize>,
}

impl MockStreamConnector {
    pub fn new(stream: MockStream) -> Self {
        Self {
            stream,
            refuse: None,
            connect_delay: None,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every connect fails with this message.
    pub fn refusing(message: &str) -> Self {
        Self {
            refuse: Some(message.to_string()),
            ..Self::new(MockStream::messages(&[]))
        }
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Whether a connection handed out by this connector was closed.
    pub fn closed(&self) -> bool {
        self.stream.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StreamConnector for MockStreamConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.refuse {
            return Err(StreamError::Connect {
                url: url.to_string(),
                message: message.clone(),
            });
        }
        Ok(Box::new(self.stream.clone()))
    }
}
