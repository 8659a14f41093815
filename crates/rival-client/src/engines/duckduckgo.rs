use std::sync::LazyLock;

use rival_core::models::{SearchQuery, SearchResult};
use scraper::{Html, Selector};
use url::Url;

use super::{ResultPage, is_http, locale, result, text_of};
use crate::extract::selector;

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";

static CONTAINER: LazyLock<Selector> = LazyLock::new(|| selector("div.result, div.web-result"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("a.result__a"));
static SNIPPET: LazyLock<Selector> = LazyLock::new(|| selector(".result__snippet"));
static NO_RESULTS: LazyLock<Selector> = LazyLock::new(|| selector(".no-results"));

/// DuckDuckGo's script-free HTML endpoint.
#[derive(Debug, Clone, Copy)]
pub struct DuckDuckGo;

impl ResultPage for DuckDuckGo {
    const NAME: &'static str = "duckduckgo";

    fn search_url(query: &SearchQuery) -> Result<Url, url::ParseError> {
        // kl is "<region>-<language>", "wt-wt" for no preference.
        let kl = match locale(query) {
            (lang, Some(region)) => format!("{region}-{}", lang.as_deref().unwrap_or("en")),
            (_, None) => "wt-wt".to_string(),
        };
        Url::parse_with_params(ENDPOINT, &[("q", query.text.as_str()), ("kl", kl.as_str())])
    }

    fn parse(html: &str) -> Result<Vec<SearchResult>, String> {
        let document = Html::parse_document(html);
        let containers: Vec<_> = document.select(&CONTAINER).collect();
        if containers.is_empty() {
            if document.select(&NO_RESULTS).next().is_some() || html.contains("No results.") {
                return Ok(Vec::new());
            }
            return Err("no result containers on page".to_string());
        }

        let mut results = Vec::new();
        for container in containers {
            if container.value().classes().any(|c| c == "result--ad") {
                continue;
            }
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
            results.push(result(title, url, snippet, rank, false));
        }
        Ok(results)
    }
}

/// Result links point at `//duckduckgo.com/l/?uddg=<target>`.
fn unwrap_redirect(href: &str) -> Option<String> {
    let absolute = Url::parse("https://duckduckgo.com/").ok()?.join(href).ok()?;
    if absolute.host_str().is_some_and(|h| h.ends_with("duckduckgo.com")) {
        let target = absolute
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned())?;
        return is_http(&target).then_some(target);
    }
    let absolute = absolute.to_string();
    is_http(&absolute).then_some(absolute)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rival_core::models::SearchOptions;

    pub(crate) const FIXTURE: &str = r#"
<html><body>
<div id="links" class="results">
  <div class="result results_links result--ad">
    <a class="result__a" href="https://ads.example/click">Sponsored thing</a>
  </div>
  <div class="result results_links results_links_deep web-result">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">Rust Programming Language</a>
    </h2>
    <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">A language empowering everyone to build reliable software.</a>
  </div>
  <div class="result results_links web-result">
    <h2 class="result__title">
      <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Rust   Book</a>
    </h2>
    <div class="result__snippet">Learn Rust.</div>
  </div>
</div>
</body></html>"#;

    #[test]
    fn parses_results_and_unwraps_redirects() {
        let results = DuckDuckGo::parse(FIXTURE).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(results[0].title, "Rust Programming Language");
        assert_eq!(results[0].snippet, "A language empowering everyone to build reliable software.");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].title, "The Rust Book");
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn empty_result_page_is_ok() {
        let html = r#"<html><body><div class="no-results">No results.</div></body></html>"#;
        assert_eq!(DuckDuckGo::parse(html).unwrap(), vec![]);
    }

    #[test]
    fn unrelated_page_is_an_error() {
        assert!(DuckDuckGo::parse("<html><body>captcha</body></html>").is_err());
    }

    #[test]
    fn query_url_carries_locale() {
        let options = SearchOptions {
            language: Some("de".into()),
            region: Some("DE".into()),
            ..Default::default()
        };
        let url = DuckDuckGo::search_url(&SearchQuery::new("tokio select", &options)).unwrap();
        assert_eq!(url.as_str(), "https://html.duckduckgo.com/html/?q=tokio+select&kl=de-de");

        let url = DuckDuckGo::search_url(&SearchQuery::new("x", &SearchOptions::default())).unwrap();
        assert!(url.as_str().ends_with("kl=wt-wt"));
    }
}
