//! One-shot retrieval: a URL, a batch of URLs, a `search:` query, or a
//! `ws://`/`wss://` stream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::AppError;
use crate::models::{FetchOptions, SearchOptions, SearchResult, Technique};
use crate::search::SearchOrchestrator;
use crate::stream::{StreamCapture, StreamRetriever, is_stream_url};
use crate::traits::{Extractor, Fetcher};

const SEARCH_PREFIX: &str = "search:";
const TRUNCATION_MARKER: &str = "…[truncated]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum RawInput {
    One(String),
    Many(Vec<String>),
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawInput")]
pub enum RetrievalInput {
    Url(String),
    Urls(Vec<String>),
    Search(String),
    Stream(String),
}

impl RetrievalInput {
    /// `search:<query>` (prefix matched case-insensitively) is a search,
    /// a `ws://` or `wss://` URL is a stream, anything else is a single URL.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.get(..SEARCH_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(SEARCH_PREFIX) => {
                RetrievalInput::Search(trimmed[SEARCH_PREFIX.len()..].trim().to_string())
            }
            _ if is_stream_url(trimmed) => RetrievalInput::Stream(trimmed.to_string()),
            _ => RetrievalInput::Url(trimmed.to_string()),
        }
    }
}

impl From<RawInput> for RetrievalInput {
    fn from(raw: RawInput) -> Self {
        match raw {
            RawInput::One(s) => RetrievalInput::parse(&s),
            RawInput::Many(urls) => RetrievalInput::Urls(urls),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOptions {
    /// Batch size cap, and the result count for searches.
    pub limit: usize,
    /// Maximum characters of text per page.
    pub max_length: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            max_length: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPage {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub method: Option<String>,
    pub confidence: f32,
    pub degraded: bool,
    pub technique: Option<Technique>,
    /// Set when this URL failed; the rest of the batch is unaffected.
    pub error: Option<String>,
    pub truncated: bool,
}

impl RetrievedPage {
    fn failed(url: &str, error: String) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            content: String::new(),
            method: None,
            confidence: 0.0,
            degraded: true,
            technique: None,
            error: Some(error),
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrievalOutput {
    Pages { pages: Vec<RetrievedPage> },
    SearchResults { query: String, results: Vec<SearchResult> },
    Stream { capture: StreamCapture, truncated: bool },
}

#[derive(Clone)]
pub struct Retriever<F, E> {
    fetcher: F,
    extractor: E,
    search: Option<SearchOrchestrator>,
    stream: Option<StreamRetriever>,
    workers: usize,
    fetch_options: FetchOptions,
}

impl<F, E> Retriever<F, E>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    pub fn new(fetcher: F, extractor: E) -> Self {
        Self {
            fetcher,
            extractor,
            search: None,
            stream: None,
            workers: 4,
            fetch_options: FetchOptions::default(),
        }
    }

    pub fn with_search(mut self, search: SearchOrchestrator) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_stream(mut self, stream: StreamRetriever) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    pub async fn retrieve(
        &self,
        input: &RetrievalInput,
        options: &RetrievalOptions,
    ) -> Result<RetrievalOutput, AppError> {
        match input {
            RetrievalInput::Url(url) => Ok(RetrievalOutput::Pages {
                pages: self.fetch_all(std::slice::from_ref(url), options).await,
            }),
            RetrievalInput::Urls(urls) => {
                let take = urls.len().min(options.limit);
                if take < urls.len() {
                    tracing::info!(requested = urls.len(), limit = options.limit, "Batch truncated");
                }
                Ok(RetrievalOutput::Pages {
                    pages: self.fetch_all(&urls[..take], options).await,
                })
            }
            RetrievalInput::Search(query) => {
                let search = self.search.as_ref().ok_or_else(|| {
                    AppError::ConfigError("search requested but no search engines are configured".into())
                })?;
                let search_options = SearchOptions {
                    count: options.limit,
                    ..Default::default()
                };
                let results = search.search(query, &search_options).await?;
                Ok(RetrievalOutput::SearchResults {
                    query: query.clone(),
                    results,
                })
            }
            RetrievalInput::Stream(url) => {
                let stream = self.stream.as_ref().ok_or_else(|| {
                    AppError::ConfigError("stream requested but no stream connector is configured".into())
                })?;
                let mut capture = stream.capture(url, None).await?;
                let (content, truncated) = truncate_chars(&capture.content, options.max_length);
                capture.content = content;
                Ok(RetrievalOutput::Stream { capture, truncated })
            }
        }
    }

    /// Fetches every URL concurrently; output order matches input order.
    async fn fetch_all(&self, urls: &[String], options: &RetrievalOptions) -> Vec<RetrievedPage> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut set = JoinSet::new();
        for (idx, url) in urls.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let extractor = self.extractor.clone();
            let fetch_options = self.fetch_options.clone();
            let semaphore = Arc::clone(&semaphore);
            let url = url.clone();
            let max_length = options.max_length;
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, RetrievedPage::failed(&url, "worker pool closed".into()));
                };
                (idx, retrieve_one(&fetcher, &extractor, &fetch_options, &url, max_length).await)
            });
        }

        let mut pages: Vec<Option<RetrievedPage>> = (0..urls.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, page)) => pages[idx] = Some(page),
                Err(e) => tracing::warn!(error = %e, "Retrieval task failed"),
            }
        }

        urls.iter()
            .zip(pages)
            .map(|(url, page)| page.unwrap_or_else(|| RetrievedPage::failed(url, "task aborted".into())))
            .collect()
    }
}

async fn retrieve_one<F: Fetcher, E: Extractor>(
    fetcher: &F,
    extractor: &E,
    options: &FetchOptions,
    url: &str,
    max_length: usize,
) -> RetrievedPage {
    match fetcher.fetch(url, options).await {
        Ok(fetched) => {
            let extracted = extractor.extract(&fetched);
            let (content, truncated) = truncate_chars(&extracted.text, max_length);
            tracing::debug!(
                url = %url,
                method = %extracted.method,
                confidence = extracted.confidence,
                truncated,
                "Retrieved"
            );
            RetrievedPage {
                url: url.to_string(),
                title: extracted.title,
                content,
                method: Some(extracted.method),
                confidence: extracted.confidence,
                degraded: extracted.degraded,
                technique: Some(fetched.technique),
                error: None,
                truncated,
            }
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Retrieval failed");
            RetrievedPage::failed(url, e.to_string())
        }
    }
}

/// Cuts `text` to at most `max_chars` characters, appending a marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        None => (text.to_string(), false),
        Some((byte_idx, _)) => (format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]), true),
    }
}
