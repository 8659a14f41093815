//! HTML search engine adapters.
//!
//! Each engine is a [`ResultPage`]: how to build its query URL and how to
//! parse its result page. [`HtmlSearchEngine`] fetches through any
//! [`Fetcher`] and runs the parser, so the parsers stay pure and testable
//! against saved fixtures.

pub mod bing;
pub mod duckduckgo;
pub mod yahoo;

use std::marker::PhantomData;

use rival_core::error::EngineError;
use rival_core::models::{FetchOptions, SearchQuery, SearchResult};
use rival_core::traits::{Fetcher, SearchEngine};
use scraper::ElementRef;
use url::Url;

use crate::extract::sanitize::normalize_text;

pub use bing::Bing;
pub use duckduckgo::DuckDuckGo;
pub use yahoo::Yahoo;

pub type DuckDuckGoEngine<F> = HtmlSearchEngine<F, DuckDuckGo>;
pub type BingEngine<F> = HtmlSearchEngine<F, Bing>;
pub type YahooEngine<F> = HtmlSearchEngine<F, Yahoo>;

/// One engine's URL scheme and result-page parser.
pub trait ResultPage: Send + Sync + 'static {
    const NAME: &'static str;

    fn search_url(query: &SearchQuery) -> Result<Url, url::ParseError>;

    /// Results in page order. `Err` means the page is not a result page at
    /// all (layout change, interstitial); a genuine empty result set is `Ok`.
    fn parse(html: &str) -> Result<Vec<SearchResult>, String>;
}

pub struct HtmlSearchEngine<F, P> {
    fetcher: F,
    options: FetchOptions,
    _page: PhantomData<fn() -> P>,
}

impl<F: Clone, P> Clone for HtmlSearchEngine<F, P> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            options: self.options.clone(),
            _page: PhantomData,
        }
    }
}

impl<F: Fetcher, P: ResultPage> HtmlSearchEngine<F, P> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            options: FetchOptions::default(),
            _page: PhantomData,
        }
    }

    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait::async_trait]
impl<F, P> SearchEngine for HtmlSearchEngine<F, P>
where
    F: Fetcher + 'static,
    P: ResultPage,
{
    fn name(&self) -> &str {
        P::NAME
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, EngineError> {
        let url = P::search_url(query).map_err(|e| EngineError::Parse {
            engine: P::NAME.to_string(),
            message: format!("could not build query URL: {e}"),
        })?;

        tracing::debug!(engine = P::NAME, url = %url, "Querying engine");
        let page = self
            .fetcher
            .fetch(url.as_str(), &self.options)
            .await
            .map_err(|source| EngineError::Fetch {
                engine: P::NAME.to_string(),
                source,
            })?;

        let mut results = P::parse(&page.body).map_err(|message| EngineError::Parse {
            engine: P::NAME.to_string(),
            message,
        })?;
        results.truncate(query.count);
        tracing::debug!(
            engine = P::NAME,
            technique = %page.technique,
            results = results.len(),
            "Engine page parsed"
        );
        Ok(results)
    }
}

/// A parsed result before merging.
pub(crate) fn result(title: String, url: String, snippet: String, rank: u32, featured: bool) -> SearchResult {
    SearchResult {
        title,
        url,
        snippet,
        source: String::new(),
        rank,
        featured_snippet: featured,
        estimated_traffic: None,
        position: 0,
    }
}

pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    normalize_text(&element.text().collect::<String>())
}

pub(crate) fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Decodes a percent-encoded component.
pub(crate) fn percent_decode(raw: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", raw.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// `language` and `region` as lowercase hint values, when set.
pub(crate) fn locale(query: &SearchQuery) -> (Option<String>, Option<String>) {
    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
    };
    (clean(&query.language), clean(&query.region))
}
