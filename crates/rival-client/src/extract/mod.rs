//! Main-content extraction with confidence-scored fallback.
//!
//! Strategies run in order until one produces a candidate whose confidence
//! reaches the acceptance threshold. If none does, the most confident
//! candidate is returned and flagged `degraded`. Extraction never fails.
//!
//! The winner is post-processed uniformly: noise elements are removed,
//! the HTML is converted to Markdown by the [`Cleaner`], and whitespace is
//! normalized.

pub mod links;
pub mod sanitize;
pub mod scoring;
pub mod strategies;

use std::sync::{Arc, LazyLock};

use rival_core::config::DEFAULT_EXTRACTION_THRESHOLD;
use rival_core::error::AppError;
use rival_core::models::{ExtractedContent, FetchResult};
use rival_core::traits::{Cleaner, Extractor};
use scraper::{Html, Selector};

use sanitize::{CleanFragment, normalize_markdown, normalize_text};

pub use strategies::default_strategies;

/// Parses a built-in selector literal.
pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("built-in selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static OG_TITLE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));

/// A parsed page handed to each strategy.
pub struct SourceDocument<'a> {
    pub raw: &'a str,
    pub html: &'a Html,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CandidateBody {
    /// A noise-free HTML subtree; converted to Markdown after selection.
    Fragment(CleanFragment),
    /// Plain text with no markup to convert.
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub method: &'static str,
    pub body: CandidateBody,
    pub confidence: f32,
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when this strategy finds nothing to offer.
    fn extract(&self, doc: &SourceDocument<'_>) -> Option<Candidate>;
}

#[derive(Clone)]
pub struct ExtractionPipeline<C> {
    cleaner: C,
    strategies: Arc<Vec<Box<dyn ExtractionStrategy>>>,
    threshold: f32,
}

impl<C: Cleaner> ExtractionPipeline<C> {
    pub fn new(cleaner: C) -> Self {
        Self {
            cleaner,
            strategies: Arc::new(default_strategies()),
            threshold: DEFAULT_EXTRACTION_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = Arc::new(strategies);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn select(&self, doc: &SourceDocument<'_>, url: &str) -> Option<(Candidate, bool)> {
        let mut best: Option<Candidate> = None;
        for strategy in self.strategies.iter() {
            let Some(candidate) = strategy.extract(doc) else {
                tracing::debug!(url = %url, method = strategy.name(), "Strategy found nothing");
                continue;
            };
            tracing::debug!(
                url = %url,
                method = candidate.method,
                confidence = candidate.confidence,
                "Strategy candidate"
            );
            if candidate.confidence >= self.threshold {
                return Some((candidate, true));
            }
            if best.as_ref().is_none_or(|b| candidate.confidence > b.confidence) {
                best = Some(candidate);
            }
        }
        best.map(|c| (c, false))
    }

    fn render(&self, body: CandidateBody, url: &str) -> (String, String) {
        match body {
            CandidateBody::Text(text) => (normalize_text(&text), normalize_markdown(&text)),
            CandidateBody::Fragment(fragment) => {
                let markdown = match self.cleaner.clean(&fragment.html) {
                    Ok(md) => md,
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Markdown conversion failed, using plain text");
                        fragment.text.clone()
                    }
                };
                (fragment.text, markdown)
            }
        }
    }
}

impl<C: Cleaner> Extractor for ExtractionPipeline<C> {
    fn extract(&self, page: &FetchResult) -> ExtractedContent {
        if page.body.trim().is_empty() {
            tracing::warn!(url = %page.url, "Empty body, nothing to extract");
            return ExtractedContent::empty(&page.url, "none");
        }

        let html = Html::parse_document(&page.body);
        let doc = SourceDocument {
            raw: &page.body,
            html: &html,
        };
        let title = page_title(&html);

        let Some((winner, accepted)) = self.select(&doc, &page.url) else {
            tracing::warn!(url = %page.url, "No strategy produced content");
            return ExtractedContent {
                title,
                ..ExtractedContent::empty(&page.url, "none")
            };
        };

        if !accepted {
            tracing::warn!(
                url = %page.url,
                method = winner.method,
                confidence = winner.confidence,
                threshold = self.threshold,
                "Extraction degraded"
            );
        }

        let (text, markdown) = self.render(winner.body, &page.url);
        ExtractedContent {
            url: page.url.clone(),
            title,
            text,
            markdown,
            method: winner.method.to_string(),
            confidence: winner.confidence,
            degraded: !accepted,
            links: Vec::new(),
        }
    }

    fn extract_links(&self, page: &FetchResult) -> Result<Vec<String>, AppError> {
        links::extract_links(&page.body, &page.final_url)
    }
}

fn page_title(html: &Html) -> Option<String> {
    let from_text = |sel: &Selector| {
        html.select(sel)
            .next()
            .map(|el| normalize_text(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    };
    from_text(&TITLE)
        .or_else(|| {
            html.select(&OG_TITLE)
                .next()
                .and_then(|m| m.value().attr("content"))
                .map(normalize_text)
                .filter(|t| !t.is_empty())
        })
        .or_else(|| from_text(&H1))
}
