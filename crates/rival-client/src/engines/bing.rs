use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rival_core::models::{SearchQuery, SearchResult};
use scraper::{Html, Selector};
use url::Url;

use super::{ResultPage, is_http, locale, result, text_of};
use crate::extract::selector;

const ENDPOINT: &str = "https://www.bing.com/search";

static CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector("li.b_algo, li.b_ans"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h2 a[href]"));
static SNIPPET: LazyLock<Selector> = LazyLock::new(|| selector(".b_caption p, p.b_lineclamp2, p"));
static NO_RESULTS: LazyLock<Selector> = LazyLock::new(|| selector("li.b_no"));

/// Bing web results (`li.b_algo`); answer blocks (`li.b_ans`) with a link
/// are returned as featured snippets.
#[derive(Debug, Clone, Copy)]
pub struct Bing;

impl ResultPage for Bing {
    const NAME: &'static str = "bing";

    fn search_url(query: &SearchQuery) -> Result<Url, url::ParseError> {
        let count = query.count.clamp(1, 50).to_string();
        let mut params = vec![("q", query.text.clone()), ("count", count)];
        let (lang, region) = locale(query);
        if let Some(lang) = lang {
            params.push(("setlang", lang));
        }
        if let Some(region) = region {
            params.push(("cc", region));
        }
        Url::parse_with_params(ENDPOINT, &params)
    }

    fn parse(html: &str) -> Result<Vec<SearchResult>, String> {
        let document = Html::parse_document(html);
        let containers: Vec<_> = document.select(&CONTAINER).collect();
        if containers.is_empty() {
            if document.select(&NO_RESULTS).next().is_some() {
                return Ok(Vec::new());
            }
            return Err("no result containers on page".to_string());
        }

        let mut results = Vec::new();
        for container in containers {
            let featured = container.value().classes().any(|c| c == "b_ans");
            let Some(anchor) = container.select(&TITLE).next() else {
                continue;
            };
            let Some(url) = anchor.value().attr("href").and_then(unwrap_redirect) else {
                continue;
            };
            let title = text_of(anchor);
            if title.is_empty() {
                continue;
            }
            let snippet = container.select(&SNIPPET).next().map(text_of).unwrap_or_default();
            let rank = results.len() as u32 + 1;
            results.push(result(title, url, snippet, rank, featured));
        }
        Ok(results)
    }
}

/// Tracking links look like `bing.com/ck/a?...&u=a1<base64url(target)>`.
fn unwrap_redirect(href: &str) -> Option<String> {
    let url = Url::parse(href).ok()?;
    let is_tracker = url.host_str().is_some_and(|h| h.ends_with("bing.com")) && url.path().starts_with("/ck/");
    if !is_tracker {
        return is_http(href).then(|| href.to_string());
    }
    let encoded = url.query_pairs().find(|(k, _)| k == "u").map(|(_, v)| v.into_owned())?;
    let payload = encoded.strip_prefix("a1")?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let target = String::from_utf8(decoded).ok()?;
    is_http(&target).then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rival_core::models::SearchOptions;

    const FIXTURE: &str = r#"
<html><body><ol id="b_results">
  <li class="b_ans b_top">
    <h2><a href="https://en.wikipedia.org/wiki/Rust_(programming_language)">Rust (programming language)</a></h2>
    <div class="b_caption"><p>Rust is a general-purpose programming language.</p></div>
  </li>
  <li class="b_algo">
    <h2><a href="https://www.bing.com/ck/a?!&amp;&amp;p=abc&amp;u=a1aHR0cHM6Ly93d3cucnVzdC1sYW5nLm9yZy8&amp;ntb=1">Rust Programming Language</a></h2>
    <div class="b_caption"><p class="b_lineclamp2">Fast, reliable, productive.</p></div>
  </li>
  <li class="b_algo"><h2>No link here</h2></li>
  <li class="b_ans"><div>Related searches</div></li>
  <li class="b_algo">
    <h2><a href="https://crates.io/">crates.io</a></h2>
    <p>The Rust community's crate registry.</p>
  </li>
</ol></body></html>"#;

    #[test]
    fn parses_organic_and_featured_results() {
        let results = Bing::parse(FIXTURE).unwrap();
        let urls: Vec<_> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://en.wikipedia.org/wiki/Rust_(programming_language)",
                "https://www.rust-lang.org/",
                "https://crates.io/",
            ]
        );
        assert!(results[0].featured_snippet);
        assert!(!results[1].featured_snippet);
        assert_eq!(results[1].snippet, "Fast, reliable, productive.");
        assert_eq!(results[2].snippet, "The Rust community's crate registry.");
        assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn no_results_marker_is_an_empty_page() {
        let html = r#"<html><body><ol id="b_results"><li class="b_no"><h1>There are no results</h1></li></ol></body></html>"#;
        assert!(Bing::parse(html).unwrap().is_empty());
    }

    #[test]
    fn undecodable_tracker_is_skipped() {
        assert_eq!(unwrap_redirect("https://www.bing.com/ck/a?u=zz"), None);
    }

    #[test]
    fn query_url_includes_count_and_locale() {
        let options = SearchOptions {
            count: 80,
            language: Some("en".into()),
            region: Some("US".into()),
            ..Default::default()
        };
        let url = Bing::search_url(&SearchQuery::new("rust", &options)).unwrap();
        assert_eq!(url.as_str(), "https://www.bing.com/search?q=rust&count=50&setlang=en&cc=us");
    }
}
