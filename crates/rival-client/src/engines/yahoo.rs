use std::sync::LazyLock;

use rival_core::models::{SearchQuery, SearchResult};
use scraper::{Html, Selector};
use url::Url;

use super::{ResultPage, is_http, locale, percent_decode, result, text_of};
use crate::extract::selector;

const ENDPOINT: &str = "https://search.yahoo.com/search";

static CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector("div.algo"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h3 a[href], a[href]"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| selector("h3"));
static SNIPPET: LazyLock<Selector> = LazyLock::new(|| selector("div.compText, span.st"));
static NO_RESULTS: LazyLock<Selector> = LazyLock::new(|| selector(".zrp, .noResults"));

/// Yahoo web search (`div.algo` result blocks).
#[derive(Debug, Clone, Copy)]
pub struct Yahoo;

impl ResultPage for Yahoo {
    const NAME: &'static str = "yahoo";

    fn search_url(query: &SearchQuery) -> Result<Url, url::ParseError> {
        let count = query.count.clamp(1, 50).to_string();
        let mut params = vec![
            ("p", query.text.clone()),
            ("n", count),
            ("ei", "UTF-8".to_string()),
        ];
        let (lang, region) = locale(query);
        if let Some(lang) = lang {
            params.push(("vl", format!("lang_{lang}")));
        }
        if let Some(region) = region {
            params.push(("vc", region));
        }
        Url::parse_with_params(ENDPOINT, &params)
    }

    fn parse(html: &str) -> Result<Vec<SearchResult>, String> {
        let document = Html::parse_document(html);
        let containers: Vec<_> = document.select(&CONTAINER).collect();
        if containers.is_empty() {
            if document.select(&NO_RESULTS).next().is_some() || html.contains("We did not find results") {
                return Ok(Vec::new());
            }
            return Err("no result containers on page".to_string());
        }

        let mut results = Vec::new();
        for container in containers {
            let Some(anchor) = container.select(&TITLE).next() else {
                continue;
            };
            let Some(url) = anchor.value().attr("href").and_then(unwrap_redirect) else {
                continue;
            };
            // The anchor often wraps a breadcrumb span; the heading alone is the title.
            let title = container
                .select(&HEADING)
                .next()
                .map(text_of)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| text_of(anchor));
            if title.is_empty() {
                continue;
            }
            let snippet = container.select(&SNIPPET).next().map(text_of).unwrap_or_default();
            let rank = results.len() as u32 + 1;
            results.push(result(title, url, snippet, rank, false));
        }
        Ok(results)
    }
}

/// Redirect links embed the target as a `/RU=<percent-encoded>/` path segment.
fn unwrap_redirect(href: &str) -> Option<String> {
    if let Some(start) = href.find("/RU=") {
        let rest = &href[start + 4..];
        let end = rest.find("/R").unwrap_or(rest.len());
        let target = percent_decode(&rest[..end]);
        return is_http(&target).then_some(target);
    }
    is_http(href).then(|| href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rival_core::models::SearchOptions;

    const FIXTURE: &str = r#"
<html><body><div id="web"><ol>
  <li><div class="dd algo algo-sr">
    <div class="compTitle"><h3 class="title"><a href="https://r.search.yahoo.com/_ylt=AwrX/RV=2/RE=1700000000/RO=10/RU=https%3a%2f%2ftokio.rs%2ftokio%2ftutorial/RK=2/RS=abc-">Tutorial | Tokio</a></h3></div>
    <div class="compText"><p>Tokio is an asynchronous runtime for Rust.</p></div>
  </div></li>
  <li><div class="dd algo">
    <h3><a href="https://docs.rs/tokio"><span>docs.rs</span></a></h3>
    <span class="st">API documentation.</span>
  </div></li>
  <li><div class="dd algo"><p>orphan block</p></div></li>
</ol></div></body></html>"#;

    #[test]
    fn parses_results_and_unwraps_ru_segments() {
        let results = Yahoo::parse(FIXTURE).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://tokio.rs/tokio/tutorial");
        assert_eq!(results[0].title, "Tutorial | Tokio");
        assert_eq!(results[0].snippet, "Tokio is an asynchronous runtime for Rust.");
        assert_eq!(results[1].url, "https://docs.rs/tokio");
        assert_eq!(results[1].snippet, "API documentation.");
    }

    #[test]
    fn zero_results_page_is_empty() {
        let html = r#"<html><body><div class="zrp">We did not find results for: qwzx</div></body></html>"#;
        assert!(Yahoo::parse(html).unwrap().is_empty());
    }

    #[test]
    fn query_url_uses_yahoo_parameters() {
        let options = SearchOptions {
            count: 5,
            language: Some("fr".into()),
            ..Default::default()
        };
        let url = Yahoo::search_url(&SearchQuery::new("rust async", &options)).unwrap();
        assert_eq!(url.as_str(), "https://search.yahoo.com/search?p=rust+async&n=5&ei=UTF-8&vl=lang_fr");
    }
}
