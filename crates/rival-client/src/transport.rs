use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Proxy, redirect};
use rival_core::error::TransportError;
use rival_core::traits::{RawResponse, Transport, TransportRequest};
use url::Url;

const MAX_REDIRECTS: usize = 5;

/// HTTP transport using reqwest.
///
/// Performs a single GET per call and hands back whatever status the server
/// answered with; classification and retries live in the bypass fetcher.
/// One client is built per proxy and reused.
///
/// By default, SSRF protection is **enabled**: requests to private/reserved
/// IP ranges are rejected before any connection is made. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g., for
/// CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    ssrf_protection: bool,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            direct: build_client(None)?,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    fn lock_proxied(&self) -> MutexGuard<'_, HashMap<String, Client>> {
        self.proxied.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Proxy client cache mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        if let Some(client) = self.lock_proxied().get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(Some(proxy))?;
        self.lock_proxied()
            .entry(proxy.to_string())
            .or_insert_with(|| client.clone());
        Ok(client)
    }
}

fn build_client(proxy: Option<&str>) -> Result<Client, TransportError> {
    let mut builder = Client::builder().redirect(redirect::Policy::limited(MAX_REDIRECTS));
    if let Some(proxy) = proxy {
        // A bad proxy is that proxy's failure, not the target's.
        let proxy = Proxy::all(proxy)
            .map_err(|e| TransportError::Network(format!("Invalid proxy '{proxy}': {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {e}")))
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<RawResponse, TransportError> {
        if self.ssrf_protection {
            validate_url(&request.url).await?;
        }

        let client = self.client_for(request.proxy.as_deref())?;
        let response = client
            .get(&request.url)
            .header(USER_AGENT, &request.user_agent)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(RawResponse {
            status,
            final_url,
            content_type,
            body,
        })
    }
}

fn classify_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Network(format!("Connection failed: {e}"))
    } else if e.is_redirect() {
        TransportError::Network(format!("Too many redirects: {e}"))
    } else if e.is_builder() {
        TransportError::InvalidUrl(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(TransportError::InvalidUrl(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    ensure_public_host(&parsed).await
}

/// Rejects hosts that are, or resolve to, private/reserved addresses.
pub(crate) async fn ensure_public_host(parsed: &Url) -> Result<(), TransportError> {
    let host = parsed
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl("URL has no host".to_string()))?;

    // IPv6 literals come back bracketed from host_str.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(TransportError::InvalidUrl(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addr = format!("{host}:{port}");
    let addrs: Vec<_> = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| TransportError::Network(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::Network(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(TransportError::InvalidUrl(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // cloud metadata lives here
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || (a == 100 && (b & 0xC0) == 64) // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80 // link-local
                || (first & 0xFE00) == 0xFC00 // unique local
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
