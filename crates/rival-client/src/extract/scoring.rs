//! Content density measurements shared by the strategies.

use scraper::ElementRef;
use scraper::node::Node;

use super::sanitize::is_noise;

/// Minimum visible characters for a `<p>` to count as a paragraph.
const PARAGRAPH_MIN_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Non-whitespace characters outside noise elements.
    pub text_chars: usize,
    /// Of `text_chars`, those inside `<a>`.
    pub link_chars: usize,
    pub paragraphs: usize,
}

impl Metrics {
    pub fn link_density(&self) -> f32 {
        if self.text_chars == 0 {
            return 0.0;
        }
        self.link_chars as f32 / self.text_chars as f32
    }
}

pub fn visible_chars(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

pub fn measure(root: ElementRef<'_>) -> Metrics {
    let mut metrics = Metrics::default();
    walk(root, false, &mut metrics);
    metrics
}

fn walk(element: ElementRef<'_>, in_link: bool, metrics: &mut Metrics) {
    for child in element.children() {
        match child.value() {
            Node::Text(t) => {
                let n = visible_chars(t);
                metrics.text_chars += n;
                if in_link {
                    metrics.link_chars += n;
                }
            }
            Node::Element(el) if !is_noise(el) => {
                let Some(child) = ElementRef::wrap(child) else { continue };
                if el.name() == "p" && child.text().map(visible_chars).sum::<usize>() >= PARAGRAPH_MIN_CHARS {
                    metrics.paragraphs += 1;
                }
                walk(child, in_link || el.name() == "a", metrics);
            }
            _ => {}
        }
    }
}

/// Confidence in `[0, 1]` that a block is main content: rewards length and
/// paragraph structure, penalises link-heavy blocks.
pub fn quality(metrics: &Metrics) -> f32 {
    if metrics.text_chars == 0 {
        return 0.0;
    }
    let length = (metrics.text_chars as f32 / 1000.0).min(1.0);
    let structure = (metrics.paragraphs as f32 / 4.0).min(1.0);
    ((0.5 * length + 0.35 * structure + 0.15) * (1.0 - metrics.link_density())).clamp(0.0, 1.0)
}
