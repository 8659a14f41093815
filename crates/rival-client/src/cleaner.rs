use std::sync::Arc;

use htmd::HtmlToMarkdown;
use rival_core::error::AppError;
use rival_core::traits::Cleaner;

use crate::extract::sanitize::normalize_markdown;

/// Tags htmd drops outright, content included.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg", "form",
    "button", "template",
];

/// HTML-to-Markdown cleaner using htmd.
///
/// Output has trailing spaces trimmed and blank-line runs collapsed.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(SKIPPED_TAGS.to_vec())
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))?;
        Ok(normalize_markdown(&markdown))
    }
}
