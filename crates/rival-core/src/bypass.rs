//! Bypass-aware fetching.
//!
//! [`BypassFetcher`] wraps a [`Transport`] and escalates through an ordered
//! plan of techniques until one yields usable content:
//!
//! ```text
//! direct --> rotated user agent (xN) --> rotated proxy (xM) --> archive mirrors
//! ```
//!
//! 404/410 on the live site ends the fetch immediately. A timeout is retried
//! once per fetch; a second timeout is surfaced as [`FetchError::Timeout`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::backoff::Backoff;
use crate::error::{FetchError, TransportError};
use crate::models::{FetchOptions, FetchResult, Technique};
use crate::rotation::RotationRegistry;
use crate::traits::{Fetcher, RawResponse, Transport, TransportRequest};

pub const DEFAULT_ARCHIVES: &[&str] = &["https://web.archive.org/web/2/", "https://archive.ph/newest/"];

/// Body fragments served by anti-bot interstitials.
pub const BLOCK_MARKERS: &[&str] = &[
    "cf-chl-",
    "/cdn-cgi/challenge-platform",
    "attention required! | cloudflare",
    "captcha-delivery.com",
    "px-captcha",
    "verify you are human",
    "are you a robot",
    "unusual traffic from your computer network",
    "<title>access denied</title>",
];

/// Body fragments that indicate the content sits behind a paywall.
pub const PAYWALL_MARKERS: &[&str] = &[
    "sign in to read",
    "subscribe to continue reading",
    "subscribe to read",
    "become a member to read",
    "login to continue",
];

#[derive(Debug, Clone)]
pub struct BypassConfig {
    /// Timeout for each individual attempt.
    pub timeout: Duration,
    /// Deadline for the whole fetch, backoff included.
    pub deadline: Duration,
    /// Attempts with a rotated user agent after a blocked direct request.
    pub max_ua_attempts: u32,
    /// Attempts through rotated proxies; skipped when no proxy is configured.
    pub max_proxy_attempts: u32,
    /// Cap on total attempts across all techniques.
    pub max_attempts: u32,
    /// Mirror prefixes; the target URL is appended verbatim.
    pub archives: Vec<String>,
    /// A 2xx HTML body shorter than this (after trimming) counts as blocked.
    pub min_body_len: usize,
    pub backoff: Backoff,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            deadline: Duration::from_secs(60),
            max_ua_attempts: 2,
            max_proxy_attempts: 2,
            max_attempts: 8,
            archives: DEFAULT_ARCHIVES.iter().map(|s| s.to_string()).collect(),
            min_body_len: 32,
            backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Direct,
    UserAgent,
    Proxy,
    Archive(String),
}

impl Step {
    fn technique(&self) -> Technique {
        match self {
            Step::Direct => Technique::Direct,
            Step::UserAgent => Technique::RotatedUserAgent,
            Step::Proxy => Technique::RotatedProxy,
            Step::Archive(_) => Technique::ArchiveFallback,
        }
    }
}

/// How one response is judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Usable,
    NotFound,
    Blocked(&'static str),
    Transient(String),
}

/// Classifies a raw response. Pure, so thresholds are easy to test.
pub fn classify(response: &RawResponse, min_body_len: usize) -> Verdict {
    match response.status {
        404 | 410 => return Verdict::NotFound,
        403 => return Verdict::Blocked("status 403"),
        429 => return Verdict::Blocked("status 429"),
        503 => return Verdict::Blocked("status 503"),
        s if s >= 400 => return Verdict::Transient(format!("HTTP {s}")),
        s if !(200..300).contains(&s) => {
            return Verdict::Transient(format!("unexpected status {s}"));
        }
        _ => {}
    }

    let lower = response.body.to_lowercase();
    if BLOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        return Verdict::Blocked("anti-bot marker");
    }
    if PAYWALL_MARKERS.iter().any(|m| lower.contains(m)) {
        return Verdict::Blocked("paywall marker");
    }

    let is_html = response
        .content_type
        .as_deref()
        .is_none_or(|ct| ct.to_ascii_lowercase().contains("html"));
    if is_html && response.body.trim().len() < min_body_len {
        return Verdict::Blocked("empty body");
    }

    Verdict::Usable
}

/// A [`Fetcher`] that escalates through bypass techniques over a [`Transport`].
#[derive(Clone)]
pub struct BypassFetcher<T> {
    transport: T,
    rotation: RotationRegistry,
    config: Arc<BypassConfig>,
}

impl<T: Transport> BypassFetcher<T> {
    pub fn new(transport: T, rotation: RotationRegistry, config: BypassConfig) -> Self {
        Self {
            transport,
            rotation,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BypassConfig {
        &self.config
    }

    /// A fetcher sharing this one's transport and rotation state that never
    /// falls back to archive mirrors. Search result pages must be live.
    pub fn without_archives(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            rotation: self.rotation.clone(),
            config: Arc::new(BypassConfig {
                archives: Vec::new(),
                ..(*self.config).clone()
            }),
        }
    }

    fn plan(&self) -> Vec<Step> {
        let mut plan = vec![Step::Direct];
        plan.extend((0..self.config.max_ua_attempts).map(|_| Step::UserAgent));
        if self.rotation.has_proxies() {
            plan.extend((0..self.config.max_proxy_attempts).map(|_| Step::Proxy));
        }
        plan.extend(self.config.archives.iter().cloned().map(Step::Archive));
        plan
    }

    fn request_for(&self, step: &Step, url: &str, timeout: Duration) -> Option<TransportRequest> {
        let (target, user_agent, proxy) = match step {
            Step::Direct => (url.to_string(), self.rotation.default_user_agent().to_string(), None),
            Step::UserAgent => (url.to_string(), self.rotation.next_user_agent(), None),
            Step::Proxy => (
                url.to_string(),
                self.rotation.next_user_agent(),
                Some(self.rotation.next_proxy()?),
            ),
            Step::Archive(prefix) => (format!("{prefix}{url}"), self.rotation.next_user_agent(), None),
        };
        Some(TransportRequest {
            url: target,
            user_agent,
            proxy,
            timeout,
        })
    }

    async fn send(&self, request: &TransportRequest) -> Result<RawResponse, TransportError> {
        match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn run(&self, url: &str, options: &FetchOptions) -> Result<FetchResult, FetchError> {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let deadline = options.deadline.unwrap_or(self.config.deadline);
        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts).max(1);

        let plan = self.plan();
        let mut idx = 0;
        let mut attempts: u32 = 0;
        let mut timeouts = 0;
        let mut saw_block = false;
        let mut last_technique = Technique::Direct;
        let mut last_error: Option<String> = None;

        while let Some(step) = plan.get(idx) {
            if attempts >= max_attempts {
                break;
            }
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    technique: last_technique,
                });
            }
            if attempts > 0 {
                let pause = self.config.backoff.delay(attempts - 1).min(remaining);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }

            let attempt_timeout = timeout.min(deadline.saturating_sub(started.elapsed()));
            let Some(request) = self.request_for(step, url, attempt_timeout) else {
                tracing::debug!(url = %url, technique = %step.technique(), "No healthy proxy, skipping");
                idx += 1;
                continue;
            };

            attempts += 1;
            last_technique = step.technique();
            let outcome = self.send(&request).await;

            match outcome {
                Ok(response) => match classify(&response, self.config.min_body_len) {
                    Verdict::Usable => {
                        if let Some(proxy) = &request.proxy {
                            self.rotation.record_proxy_success(proxy);
                        }
                        tracing::info!(
                            url = %url,
                            technique = %last_technique,
                            attempts,
                            status = response.status,
                            "Fetched"
                        );
                        return Ok(FetchResult {
                            url: url.to_string(),
                            final_url: response.final_url,
                            status: response.status,
                            body: response.body,
                            content_type: response.content_type,
                            technique: last_technique,
                            attempts,
                            latency_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    Verdict::NotFound if !matches!(step, Step::Archive(_)) => {
                        tracing::debug!(url = %url, technique = %last_technique, "Not found");
                        return Err(FetchError::NotFound {
                            url: url.to_string(),
                        });
                    }
                    Verdict::NotFound => {
                        tracing::debug!(url = %url, mirror = %request.url, "Mirror has no copy");
                        last_error = Some(format!("no archived copy at {}", request.url));
                    }
                    Verdict::Blocked(reason) => {
                        saw_block = true;
                        tracing::debug!(
                            url = %url,
                            technique = %last_technique,
                            reason,
                            "Attempt blocked"
                        );
                    }
                    Verdict::Transient(message) => {
                        tracing::debug!(
                            url = %url,
                            technique = %last_technique,
                            error = %message,
                            "Attempt failed"
                        );
                        last_error = Some(message);
                    }
                },
                Err(TransportError::Timeout) => {
                    timeouts += 1;
                    tracing::debug!(url = %url, technique = %last_technique, timeouts, "Attempt timed out");
                    if let Some(proxy) = &request.proxy {
                        self.rotation.record_proxy_failure(proxy);
                    }
                    if timeouts > 1 {
                        return Err(FetchError::Timeout {
                            url: url.to_string(),
                            technique: last_technique,
                        });
                    }
                    // Retry the same step once.
                    continue;
                }
                Err(TransportError::InvalidUrl(reason)) => {
                    return Err(FetchError::InvalidUrl {
                        url: url.to_string(),
                        reason,
                    });
                }
                Err(TransportError::Network(message)) => {
                    tracing::debug!(
                        url = %url,
                        technique = %last_technique,
                        error = %message,
                        "Attempt failed"
                    );
                    if let Some(proxy) = &request.proxy {
                        self.rotation.record_proxy_failure(proxy);
                    }
                    last_error = Some(message);
                }
            }
            idx += 1;
        }

        if saw_block {
            tracing::warn!(url = %url, attempts, technique = %last_technique, "All bypass techniques exhausted");
            Err(FetchError::Blocked {
                url: url.to_string(),
                last_technique,
                attempts,
            })
        } else {
            tracing::warn!(url = %url, attempts, "Fetch failed on every technique");
            Err(FetchError::NetworkError {
                url: url.to_string(),
                message: last_error.unwrap_or_else(|| "no attempt was made".to_string()),
            })
        }
    }
}

/// Rejects anything that is not an absolute http(s) URL.
pub fn validate_target(url: &str) -> Result<(), FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        "http" | "https" => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        }),
        scheme => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("URL scheme '{scheme}' is not allowed (only http/https)"),
        }),
    }
}

impl<T: Transport> Fetcher for BypassFetcher<T> {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult, FetchError> {
        validate_target(url)?;
        self.run(url, options).await
    }
}
