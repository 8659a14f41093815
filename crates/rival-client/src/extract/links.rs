//! Outgoing link harvesting.

use std::collections::HashSet;
use std::sync::LazyLock;

use rival_core::error::AppError;
use scraper::{Html, Selector};
use url::Url;

use super::selector;

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static BASE: LazyLock<Selector> = LazyLock::new(|| selector("base[href]"));

const SKIPPED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "sms:"];

/// Absolute http(s) links of `html` in document order, deduplicated.
///
/// Relative hrefs resolve against `<base href>` when present, else against
/// `page_url`. Fragments are dropped.
pub fn extract_links(html: &str, page_url: &str) -> Result<Vec<String>, AppError> {
    let page = Url::parse(page_url)
        .map_err(|e| AppError::LinkExtraction(format!("invalid base URL '{page_url}': {e}")))?;
    let document = Html::parse_document(html);

    let base = document
        .select(&BASE)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page.join(href.trim()).ok())
        .unwrap_or(page);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lower = href.to_ascii_lowercase();
        if SKIPPED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    Ok(links)
}
