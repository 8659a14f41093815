//! The built-in extraction strategies, in the order the pipeline runs them.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::ElementRef;

use super::sanitize::{clean_fragment, is_noise, normalize_text};
use super::scoring::{measure, quality, visible_chars};
use super::{Candidate, CandidateBody, ExtractionStrategy, SourceDocument, selector};

static JSON_LD: LazyLock<scraper::Selector> =
    LazyLock::new(|| selector(r#"script[type="application/ld+json"]"#));
static ITEMPROP_BODY: LazyLock<scraper::Selector> =
    LazyLock::new(|| selector(r#"[itemprop="articleBody"]"#));
static PARAGRAPH: LazyLock<scraper::Selector> = LazyLock::new(|| selector("p"));
static BODY: LazyLock<scraper::Selector> = LazyLock::new(|| selector("body"));

/// Well-known main-content containers, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    r#"[role="main"]"#,
    ".post-content",
    ".article-content",
    ".article-body",
    ".entry-content",
    ".post-body",
    ".main-content",
    "#content",
    "#main",
    ".content",
];

static CONTENT_SELECTOR_LIST: LazyLock<Vec<scraper::Selector>> =
    LazyLock::new(|| CONTENT_SELECTORS.iter().map(|s| selector(s)).collect());

static POSITIVE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|main|page|post|text|blog|story")
        .expect("built-in regex")
});
static NEGATIVE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)comment|meta|footer|footnote|sidebar|sponsor|\bads?\b|nav|share|related|widget|promo|banner|masthead|popup|combx|contact")
        .expect("built-in regex")
});

static INVISIBLE_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->")
        .expect("built-in regex")
});
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("built-in regex"));

/// Containers with less text than this are never picked by the selector scan.
const SELECTOR_MIN_CHARS: usize = 100;

/// JSON-LD text below this length is treated as a teaser, not the article.
const STRUCTURED_MIN_CHARS: usize = 200;

/// Upper bound for the whole-document fallback.
pub const TAG_STRIPPING_MAX_CONFIDENCE: f32 = 0.55;

// ---------------------------------------------------------------------------
// Structured markup
// ---------------------------------------------------------------------------

/// Article text published as JSON-LD `articleBody`/`text` or marked up with
/// `itemprop="articleBody"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredMarkup;

impl ExtractionStrategy for StructuredMarkup {
    fn name(&self) -> &'static str {
        "structured_markup"
    }

    fn extract(&self, doc: &SourceDocument<'_>) -> Option<Candidate> {
        let from_json_ld = doc
            .html
            .select(&JSON_LD)
            .filter_map(|script| serde_json::from_str::<serde_json::Value>(&script.text().collect::<String>()).ok())
            .filter_map(|value| longest_article_text(&value))
            .max_by_key(|text| visible_chars(text));

        if let Some(text) = from_json_ld {
            let chars = visible_chars(&text);
            let confidence = if chars >= STRUCTURED_MIN_CHARS {
                0.75 + 0.2 * (chars as f32 / 2000.0).min(1.0)
            } else {
                0.5 * chars as f32 / STRUCTURED_MIN_CHARS as f32
            };
            return Some(Candidate {
                method: self.name(),
                body: CandidateBody::Text(text),
                confidence,
            });
        }

        let element = doc.html.select(&ITEMPROP_BODY).next()?;
        let confidence = (quality(&measure(element)) + 0.1).min(1.0);
        Some(Candidate {
            method: self.name(),
            body: CandidateBody::Fragment(clean_fragment(element)),
            confidence,
        })
    }
}

/// Walks a JSON-LD value (objects, arrays, `@graph`) for the longest
/// `articleBody` or `text` string.
fn longest_article_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(longest_article_text)
            .max_by_key(|t| visible_chars(t)),
        serde_json::Value::Object(map) => {
            let own = ["articleBody", "text"]
                .iter()
                .filter_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            let nested = map
                .iter()
                .filter(|(_, v)| v.is_object() || v.is_array())
                .filter_map(|(_, v)| longest_article_text(v));
            own.chain(nested).max_by_key(|t| visible_chars(t))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Content selectors
// ---------------------------------------------------------------------------

/// The first well-known content container holding enough text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSelectors;

impl ExtractionStrategy for ContentSelectors {
    fn name(&self) -> &'static str {
        "content_selectors"
    }

    fn extract(&self, doc: &SourceDocument<'_>) -> Option<Candidate> {
        CONTENT_SELECTOR_LIST.iter().find_map(|sel| {
            let element = doc.html.select(sel).next()?;
            let metrics = measure(element);
            if metrics.text_chars <= SELECTOR_MIN_CHARS {
                return None;
            }
            Some(Candidate {
                method: self.name(),
                body: CandidateBody::Fragment(clean_fragment(element)),
                confidence: quality(&metrics),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Readability
// ---------------------------------------------------------------------------

/// Paragraph-density scoring: each paragraph credits its parent fully and its
/// grandparent by half, weighted by class and id hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readability;

impl Readability {
    fn base_score(element: ElementRef<'_>) -> f32 {
        let value = element.value();
        let tag = match value.name() {
            "article" => 10.0,
            "div" | "main" | "section" => 5.0,
            "pre" | "td" | "blockquote" => 3.0,
            "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
            _ => 0.0,
        };
        let mut hints = 0.0;
        for token in value.classes().chain(value.id()) {
            if NEGATIVE_HINT.is_match(token) {
                hints -= 25.0;
            } else if POSITIVE_HINT.is_match(token) {
                hints += 25.0;
            }
        }
        tag + hints
    }
}

impl ExtractionStrategy for Readability {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn extract(&self, doc: &SourceDocument<'_>) -> Option<Candidate> {
        let mut scores: HashMap<_, (ElementRef<'_>, f32)> = HashMap::new();

        for paragraph in doc.html.select(&PARAGRAPH) {
            if paragraph
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| is_noise(a.value()))
            {
                continue;
            }
            let text = paragraph.text().collect::<String>();
            let chars = visible_chars(&text);
            if chars < 25 {
                continue;
            }
            let points = 1.0 + text.matches(',').count() as f32 + (chars as f32 / 100.0).min(3.0);

            let mut ancestors = paragraph.ancestors().filter_map(ElementRef::wrap);
            for share in [1.0, 0.5] {
                let Some(ancestor) = ancestors.next() else { break };
                let entry = scores
                    .entry(ancestor.id())
                    .or_insert_with(|| (ancestor, Self::base_score(ancestor)));
                entry.1 += points * share;
            }
        }

        let (best, score) = scores
            .into_values()
            .map(|(el, score)| (el, score * (1.0 - measure(el).link_density())))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        if score <= 0.0 {
            return None;
        }

        Some(Candidate {
            method: self.name(),
            body: CandidateBody::Fragment(clean_fragment(best)),
            confidence: quality(&measure(best)) * 0.95,
        })
    }
}

// ---------------------------------------------------------------------------
// Tag stripping
// ---------------------------------------------------------------------------

/// Regex tag removal over the whole body. Never confident enough to win
/// outright; it exists so something is returned for hopeless markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStripping;

impl ExtractionStrategy for TagStripping {
    fn name(&self) -> &'static str {
        "tag_stripping"
    }

    fn extract(&self, doc: &SourceDocument<'_>) -> Option<Candidate> {
        // The pruned body keeps <head> text and noise elements out, same as
        // the fragment strategies.
        let source = doc
            .html
            .select(&BODY)
            .next()
            .map(|b| clean_fragment(b).html)
            .unwrap_or_else(|| doc.raw.to_string());
        let visible = INVISIBLE_BLOCKS.replace_all(&source, " ");
        let stripped = TAG.replace_all(&visible, " ");
        let text = normalize_text(&decode_entities(&stripped));
        if text.is_empty() {
            return None;
        }
        let confidence =
            TAG_STRIPPING_MAX_CONFIDENCE * (visible_chars(&text) as f32 / 1000.0).min(1.0);
        Some(Candidate {
            method: self.name(),
            body: CandidateBody::Text(text),
            confidence,
        })
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// The default strategy order.
pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(StructuredMarkup),
        Box::new(ContentSelectors),
        Box::new(Readability),
        Box::new(TagStripping),
    ]
}
