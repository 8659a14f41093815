//! Bounded breadth-first link traversal.
//!
//! Each node moves through
//!
//! ```text
//! Pending(url, depth) --> Fetched --> Extracted --> LinksEnqueued --> Done
//!                    \-----------\------------\--> Failed
//! ```
//!
//! A depth level is fetched concurrently on a semaphore-bounded [`JoinSet`].
//! URLs are marked visited when enqueued, so the number of fetches never
//! exceeds `max_pages` and no URL is fetched twice.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::canonical::{canonicalize, registered_domain};
use crate::error::{FetchError, TraversalError};
use crate::models::{
    ExtractedContent, FailedNode, FetchOptions, TraversalMode, TraversalReport, TraversalRequest,
    TraversedPage,
};
use crate::traits::{Extractor, Fetcher};

/// Path fragments that mark documentation pages.
const DOC_PATH_MARKERS: &[&str] = &["/docs/", "/doc/", "/api/", "/guide/", "/guides/", "/reference/", "/tutorial/", "/manual/"];

/// File extensions that never hold page content.
const NON_CONTENT_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "tif", "tiff", "zip", "tar",
    "gz", "tgz", "bz2", "rar", "7z", "exe", "dmg", "iso", "mp3", "mp4", "m4a", "avi", "mov", "mkv",
    "webm", "wav", "flac", "ogg", "css", "js", "xml", "rss", "atom", "woff", "woff2", "ttf", "eot",
    "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Concurrent fetches within one depth level.
    pub workers: usize,
    /// Deadline for the whole run.
    pub deadline: Duration,
    /// Upper bound on URLs waiting in the next level.
    pub frontier_cap: usize,
    pub fetch_options: FetchOptions,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline: Duration::from_secs(120),
            frontier_cap: 500,
            fetch_options: FetchOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Fetched,
    Extracted,
    LinksEnqueued,
    Done,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Fetched => "fetched",
            NodeState::Extracted => "extracted",
            NodeState::LinksEnqueued => "links_enqueued",
            NodeState::Done => "done",
            NodeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

enum NodeOutcome {
    Extracted {
        content: ExtractedContent,
        links: Vec<String>,
    },
    FetchFailed(FetchError),
    LinksFailed {
        reason: String,
    },
    Cancelled,
}

#[derive(Clone)]
pub struct Traverser<F, E> {
    fetcher: F,
    extractor: E,
    config: Arc<TraversalConfig>,
}

impl<F, E> Traverser<F, E>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
{
    pub fn new(fetcher: F, extractor: E, config: TraversalConfig) -> Self {
        Self {
            fetcher,
            extractor,
            config: Arc::new(config),
        }
    }

    pub async fn traverse(
        &self,
        request: &TraversalRequest,
    ) -> Result<TraversalReport, TraversalError> {
        let root = canonicalize(&request.root_url).ok_or_else(|| TraversalError::InvalidRoot {
            url: request.root_url.clone(),
            reason: "not an absolute http(s) URL".to_string(),
        })?;
        let root_domain = registered_domain(&root);
        let run_id = Uuid::new_v4();
        let deadline_at = tokio::time::Instant::now() + self.config.deadline;
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));

        tracing::info!(
            run_id = %run_id,
            url = %root,
            mode = %request.mode,
            max_depth = request.max_depth,
            max_pages = request.max_pages,
            "Traversal started"
        );

        let mut visited: HashSet<String> = HashSet::from([root.clone()]);
        let mut level: Vec<String> = vec![root.clone()];
        let mut report = TraversalReport {
            root_url: root.clone(),
            mode: request.mode,
            pages: Vec::new(),
            failed: Vec::new(),
            max_depth_reached: 0,
            fetches: 0,
            timed_out: false,
        };
        let mut depth: u32 = 0;

        while !level.is_empty() && report.fetches < request.max_pages {
            level.truncate(request.max_pages - report.fetches);
            report.fetches += level.len();
            report.max_depth_reached = depth;

            let mut set = JoinSet::new();
            for (idx, url) in level.iter().enumerate() {
                tracing::debug!(run_id = %run_id, url = %url, depth, state = %NodeState::Pending, "Node");
                let fetcher = self.fetcher.clone();
                let extractor = self.extractor.clone();
                let options = self.config.fetch_options.clone();
                let semaphore = Arc::clone(&semaphore);
                let token = cancel.child_token();
                let url = url.clone();
                set.spawn(async move {
                    let outcome = tokio::select! {
                        _ = token.cancelled() => NodeOutcome::Cancelled,
                        outcome = async {
                            let Ok(_permit) = semaphore.acquire_owned().await else {
                                return NodeOutcome::Cancelled;
                            };
                            visit(&fetcher, &extractor, &options, &url, depth).await
                        } => outcome,
                    };
                    (idx, outcome)
                });
            }

            let mut outcomes: Vec<Option<NodeOutcome>> = (0..level.len()).map(|_| None).collect();
            loop {
                let joined = tokio::select! {
                    joined = set.join_next() => joined,
                    _ = tokio::time::sleep_until(deadline_at) => {
                        cancel.cancel();
                        set.abort_all();
                        report.timed_out = true;
                        tracing::warn!(
                            run_id = %run_id,
                            url = %root,
                            pages = report.pages.len(),
                            "Traversal deadline exceeded"
                        );
                        break;
                    }
                };
                let Some(joined) = joined else { break };
                match joined {
                    Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                    Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Traversal task failed"),
                }
            }

            if report.timed_out && depth == 0 && outcomes[0].is_none() {
                return Err(TraversalError::Timeout {
                    url: root,
                    deadline: self.config.deadline,
                });
            }

            let mut next: Vec<String> = Vec::new();
            for (url, outcome) in level.iter().zip(outcomes) {
                match outcome {
                    Some(NodeOutcome::Extracted { mut content, links }) => {
                        if depth < request.max_depth {
                            let before = next.len();
                            for link in &links {
                                if next.len() >= self.config.frontier_cap {
                                    break;
                                }
                                let Some(key) = canonicalize(link) else { continue };
                                if is_non_content(&key) {
                                    continue;
                                }
                                if request.same_domain_only && registered_domain(&key) != root_domain {
                                    continue;
                                }
                                if visited.insert(key.clone()) {
                                    next.push(key);
                                }
                            }
                            tracing::debug!(
                                run_id = %run_id,
                                url = %url,
                                depth,
                                enqueued = next.len() - before,
                                state = %NodeState::LinksEnqueued,
                                "Node"
                            );
                        }
                        content.links = links;
                        tracing::debug!(run_id = %run_id, url = %url, depth, state = %NodeState::Done, "Node");
                        report.pages.push(TraversedPage {
                            url: url.clone(),
                            depth,
                            content,
                        });
                    }
                    Some(NodeOutcome::FetchFailed(source)) if depth == 0 => {
                        tracing::warn!(run_id = %run_id, url = %url, error = %source, "Root unreachable");
                        return Err(TraversalError::RootUnreachable {
                            url: url.clone(),
                            source,
                        });
                    }
                    Some(NodeOutcome::FetchFailed(err)) => {
                        record_failure(&mut report, url, depth, err.to_string(), run_id);
                    }
                    Some(NodeOutcome::LinksFailed { reason }) => {
                        record_failure(&mut report, url, depth, reason, run_id);
                    }
                    Some(NodeOutcome::Cancelled) | None => {
                        let reason = if report.timed_out { "deadline exceeded" } else { "cancelled" };
                        record_failure(&mut report, url, depth, reason.to_string(), run_id);
                    }
                }
            }

            if report.timed_out {
                break;
            }
            level = prioritize(request.mode, next);
            depth += 1;
        }

        tracing::info!(
            run_id = %run_id,
            url = %report.root_url,
            pages = report.pages.len(),
            failed = report.failed.len(),
            fetches = report.fetches,
            "Traversal finished"
        );
        Ok(report)
    }
}

async fn visit<F: Fetcher, E: Extractor>(
    fetcher: &F,
    extractor: &E,
    options: &FetchOptions,
    url: &str,
    depth: u32,
) -> NodeOutcome {
    let page = match fetcher.fetch(url, options).await {
        Ok(page) => page,
        Err(e) => return NodeOutcome::FetchFailed(e),
    };
    tracing::debug!(url = %url, depth, technique = %page.technique, state = %NodeState::Fetched, "Node");

    let content = extractor.extract(&page);
    tracing::debug!(
        url = %url,
        depth,
        method = %content.method,
        confidence = content.confidence,
        state = %NodeState::Extracted,
        "Node"
    );

    match extractor.extract_links(&page) {
        Ok(links) => NodeOutcome::Extracted { content, links },
        Err(e) => NodeOutcome::LinksFailed {
            reason: format!("link extraction failed: {e}"),
        },
    }
}

fn record_failure(report: &mut TraversalReport, url: &str, depth: u32, reason: String, run_id: Uuid) {
    tracing::warn!(
        run_id = %run_id,
        url = %url,
        depth,
        reason = %reason,
        state = %NodeState::Failed,
        "Node"
    );
    report.failed.push(FailedNode {
        url: url.to_string(),
        depth,
        reason,
    });
}

fn is_non_content(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let last = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    match last.rsplit_once('.') {
        Some((_, ext)) => NON_CONTENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

fn is_doc_path(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| format!("{}/", u.path().to_ascii_lowercase()))
        .unwrap_or_default();
    DOC_PATH_MARKERS.iter().any(|m| path.contains(m))
}

fn path_segments(url: &str) -> Vec<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
        })
        .unwrap_or_default()
}

/// Orders the next level according to the traversal mode.
fn prioritize(mode: TraversalMode, links: Vec<String>) -> Vec<String> {
    match mode {
        TraversalMode::Research => links,
        TraversalMode::Docs => {
            let (mut docs, rest): (Vec<_>, Vec<_>) = links.into_iter().partition(|l| is_doc_path(l));
            docs.extend(rest);
            docs
        }
        TraversalMode::Map => {
            let mut order: Vec<String> = Vec::new();
            let mut sections: HashMap<String, Vec<(usize, String)>> = HashMap::new();
            for link in links {
                let segments = path_segments(&link);
                let section = segments.first().cloned().unwrap_or_default();
                if !sections.contains_key(&section) {
                    order.push(section.clone());
                }
                sections.entry(section).or_default().push((segments.len(), link));
            }
            let mut queues: Vec<std::collections::VecDeque<String>> = order
                .iter()
                .filter_map(|s| sections.remove(s))
                .map(|mut members| {
                    members.sort_by_key(|(depth, _)| *depth);
                    members.into_iter().map(|(_, l)| l).collect()
                })
                .collect();

            let mut out = Vec::new();
            while queues.iter().any(|q| !q.is_empty()) {
                for queue in &mut queues {
                    if let Some(link) = queue.pop_front() {
                        out.push(link);
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockSite;

    fn traverser(site: &MockSite) -> Traverser<MockSite, MockSite> {
        Traverser::new(site.clone(), site.clone(), TraversalConfig::default())
    }

    fn cyclic_site() -> MockSite {
        MockSite::new()
            .page("https://site.test/", "root", &["/a", "/b", "https://site.test/#top"])
            .page("https://site.test/a", "a", &["/", "/b", "/c"])
            .page("https://site.test/b", "b", &["/a", "/d"])
            .page("https://site.test/c", "c", &["/e", "/"])
            .page("https://site.test/d", "d", &["/e", "/f"])
            .page("https://site.test/e", "e", &["/f"])
            .page("https://site.test/f", "f", &["/"])
    }

    #[tokio::test]
    async fn cyclic_graph_respects_depth_and_page_limits() {
        let site = cyclic_site();
        let mut request = TraversalRequest::new("https://site.test");
        request.max_depth = 2;
        request.max_pages = 5;

        let report = traverser(&site).traverse(&request).await.unwrap();

        assert!(report.pages.len() <= 5);
        assert!(report.pages.iter().all(|p| p.depth <= 2));
        let fetched = site.fetched();
        assert!(fetched.len() <= 5);
        let unique: HashSet<_> = fetched.iter().collect();
        assert_eq!(unique.len(), fetched.len(), "a URL was fetched twice");
        assert!(!fetched.iter().any(|u| u.ends_with("/f")), "depth 3 node was fetched");

        let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://site.test/",
                "https://site.test/a",
                "https://site.test/b",
                "https://site.test/c",
                "https://site.test/d",
            ]
        );
        assert_eq!(report.max_depth_reached, 2);
    }

    #[tokio::test]
    async fn max_depth_zero_fetches_only_root() {
        let site = cyclic_site();
        let mut request = TraversalRequest::new("https://site.test/");
        request.max_depth = 0;

        let report = traverser(&site).traverse(&request).await.unwrap();
        assert_eq!(report.pages.len(), 1);
        assert_eq!(site.fetched().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_root_fails_the_run() {
        let site = MockSite::new();
        let err = traverser(&site)
            .traverse(&TraversalRequest::new("https://nowhere.test/"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraversalError::RootUnreachable { .. }));
    }

    #[tokio::test]
    async fn invalid_root_is_rejected() {
        let site = MockSite::new();
        let err = traverser(&site)
            .traverse(&TraversalRequest::new("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraversalError::InvalidRoot { .. }));
        assert!(site.fetched().is_empty());
    }

    #[tokio::test]
    async fn failed_children_are_reported_and_traversal_continues() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &["/missing", "/ok"])
            .page("https://site.test/ok", "ok", &[]);
        let report = traverser(&site)
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "https://site.test/missing");
        assert_eq!(report.failed[0].depth, 1);
    }

    #[tokio::test]
    async fn link_extraction_failure_marks_node_failed() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &["/broken"])
            .page("https://site.test/broken", "broken", &[])
            .broken_links("https://site.test/broken");
        let report = traverser(&site)
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap();

        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("link extraction failed"));
    }

    #[tokio::test]
    async fn same_domain_filter_uses_registered_domain() {
        let site = MockSite::new()
            .page(
                "https://site.test/",
                "root",
                &["https://docs.site.test/intro", "https://elsewhere.test/"],
            )
            .page("https://docs.site.test/intro", "intro", &[])
            .page("https://elsewhere.test/", "elsewhere", &[]);

        let report = traverser(&site)
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap();
        let urls: Vec<_> = report.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://site.test/", "https://docs.site.test/intro"]);

        let mut open = TraversalRequest::new("https://site.test/");
        open.same_domain_only = false;
        let report = traverser(&site).traverse(&open).await.unwrap();
        assert_eq!(report.pages.len(), 3);
    }

    #[tokio::test]
    async fn non_content_links_are_never_fetched() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &["/report.PDF", "/logo.png", "/page"])
            .page("https://site.test/page", "page", &[]);
        let report = traverser(&site)
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap();
        assert_eq!(report.pages.len(), 2);
        assert_eq!(site.fetched().len(), 2);
    }

    #[tokio::test]
    async fn docs_mode_spends_page_limit_on_documentation() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &["/blog/news", "/pricing", "/docs/intro"])
            .page("https://site.test/blog/news", "news", &[])
            .page("https://site.test/pricing", "pricing", &[])
            .page("https://site.test/docs/intro", "intro", &[]);
        let mut request = TraversalRequest::new("https://site.test/");
        request.mode = TraversalMode::Docs;
        request.max_pages = 2;

        let report = traverser(&site).traverse(&request).await.unwrap();
        assert_eq!(report.pages[1].url, "https://site.test/docs/intro");
    }

    #[test]
    fn map_mode_interleaves_sections_shallow_first() {
        let links = vec![
            "https://s.test/blog/2024/01/post".to_string(),
            "https://s.test/blog".to_string(),
            "https://s.test/blog/archive".to_string(),
            "https://s.test/shop/item".to_string(),
            "https://s.test/about".to_string(),
        ];
        let ordered = prioritize(TraversalMode::Map, links);
        assert_eq!(
            ordered,
            vec![
                "https://s.test/blog",
                "https://s.test/shop/item",
                "https://s.test/about",
                "https://s.test/blog/archive",
                "https://s.test/blog/2024/01/post",
            ]
        );
    }

    #[test]
    fn non_content_detection() {
        assert!(is_non_content("https://s.test/files/report.pdf"));
        assert!(is_non_content("https://s.test/feed.xml"));
        assert!(!is_non_content("https://s.test/docs/v1.2/intro"));
        assert!(!is_non_content("https://s.test/"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_in_flight_fetches() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &["/slow"])
            .page("https://site.test/slow", "slow", &[])
            .with_delay(Duration::from_secs(10));
        let traverser = Traverser::new(
            site.clone(),
            site.clone(),
            TraversalConfig {
                deadline: Duration::from_secs(15),
                ..Default::default()
            },
        );

        let report = traverser
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap();
        assert!(report.timed_out);
        assert_eq!(report.pages.len(), 1);
        assert_eq!(report.pages[0].url, "https://site.test/");
        assert_eq!(report.pages[0].content.text, "root");
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].url, "https://site.test/slow");
        assert_eq!(report.failed[0].reason, "deadline exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_before_root_returns_timeout() {
        let site = MockSite::new()
            .page("https://site.test/", "root", &[])
            .with_delay(Duration::from_secs(30));
        let traverser = Traverser::new(
            site.clone(),
            site.clone(),
            TraversalConfig {
                deadline: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let err = traverser
            .traverse(&TraversalRequest::new("https://site.test/"))
            .await
            .unwrap_err();
        assert!(matches!(err, TraversalError::Timeout { .. }));
    }
}
