//! Noise removal and whitespace normalization for extracted content.

use scraper::ElementRef;
use scraper::node::{Element, Node};

/// Elements dropped with everything inside them.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "embed", "object", "template", "svg", "canvas", "nav",
    "footer", "header", "aside", "menu", "form", "button", "select", "input", "textarea",
];

/// Class/id words that mark ads, trackers and overlays.
const NOISE_WORDS: &[&str] = &[
    "ad", "ads", "advert", "advertisement", "banner", "sponsor", "sponsored", "promo", "tracking",
    "analytics", "cookie", "cookies", "popup", "modal", "overlay", "newsletter", "share", "social",
    "sidebar", "breadcrumb", "breadcrumbs",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "hr", "img", "link", "meta", "source", "track", "wbr",
];

/// Tags whose boundaries separate words in plain text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table",
    "td", "th", "tr", "ul",
];

/// A subtree with noise removed, as HTML and as plain text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanFragment {
    pub html: String,
    /// Single-spaced.
    pub text: String,
}

/// True for elements that never carry main content.
pub fn is_noise(element: &Element) -> bool {
    if NOISE_TAGS.contains(&element.name()) {
        return true;
    }
    if element.attr("aria-hidden") == Some("true") || element.attr("hidden").is_some() {
        return true;
    }
    element.classes().chain(element.id()).any(has_noise_word)
}

fn has_noise_word(token: &str) -> bool {
    token
        .split(['-', '_'])
        .any(|part| NOISE_WORDS.iter().any(|w| part.eq_ignore_ascii_case(w)))
}

/// Serializes `root` and its descendants, skipping noise subtrees.
///
/// The root itself is kept even if it looks like noise, so a caller that
/// deliberately picked a container always gets its content.
pub fn clean_fragment(root: ElementRef<'_>) -> CleanFragment {
    let mut html = String::new();
    let mut text = String::new();
    write_element(root, &mut html, &mut text, true);
    CleanFragment {
        html,
        text: normalize_text(&text),
    }
}

fn write_element(element: ElementRef<'_>, html: &mut String, text: &mut String, is_root: bool) {
    let value = element.value();
    if !is_root && is_noise(value) {
        return;
    }
    let name = value.name();
    let block = BLOCK_TAGS.contains(&name);

    html.push('<');
    html.push_str(name);
    for (key, val) in value.attrs() {
        html.push(' ');
        html.push_str(key);
        html.push_str("=\"");
        html.push_str(&escape(val, true));
        html.push('"');
    }
    html.push('>');
    if block {
        text.push(' ');
    }

    if VOID_TAGS.contains(&name) {
        return;
    }

    for child in element.children() {
        match child.value() {
            Node::Text(t) => {
                let s: &str = t;
                html.push_str(&escape(s, false));
                text.push_str(s);
            }
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, html, text, false);
                }
            }
            _ => {}
        }
    }

    html.push_str("</");
    html.push_str(name);
    html.push('>');
    if block {
        text.push(' ');
    }
}

fn escape(raw: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Collapses every whitespace run to one space and trims the ends.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims trailing spaces and collapses runs of blank lines into one.
pub fn normalize_markdown(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0;
    for line in raw.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn fragment(html: &str, selector: &str) -> CleanFragment {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(selector).unwrap();
        clean_fragment(doc.select(&sel).next().unwrap())
    }

    #[test]
    fn drops_scripts_navigation_and_ads() {
        let out = fragment(
            r#"<div id="main">
                <nav><a href="/">Home</a></nav>
                <p>Real <b>content</b> here.</p>
                <script>track()</script>
                <div class="ad-slot">Buy now</div>
                <div class="sidebar_widget">Related</div>
                <p class="loaded">Kept too.</p>
            </div>"#,
            "#main",
        );
        assert_eq!(out.text, "Real content here. Kept too.");
        assert!(out.html.contains("<b>content</b>"));
        assert!(!out.html.contains("track()"));
        assert!(!out.html.contains("Buy now"));
    }

    #[test]
    fn class_words_match_whole_tokens_only() {
        let header = scraper::Html::parse_fragment(r#"<div class="reader-mode loaded">x</div>"#);
        let sel = Selector::parse("div").unwrap();
        let div = header.select(&sel).next().unwrap();
        assert!(!is_noise(div.value()));
    }

    #[test]
    fn escapes_text_and_attributes() {
        let out = fragment(r#"<p title='say "hi"'>a &lt; b</p>"#, "p");
        assert_eq!(out.html, r#"<p title="say &quot;hi&quot;">a &lt; b</p>"#);
        assert_eq!(out.text, "a < b");
    }

    #[test]
    fn block_boundaries_separate_words() {
        let out = fragment("<ul><li>one</li><li>two</li></ul>", "ul");
        assert_eq!(out.text, "one two");
    }

    #[test]
    fn markdown_whitespace_is_normalized() {
        let md = normalize_markdown("\n\n# Title   \n\n\n\nBody line  \n\n\n- item\n\n");
        assert_eq!(md, "# Title\n\nBody line\n\n- item");
    }
}
