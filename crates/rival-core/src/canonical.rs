//! URL canonicalization for deduplication.

use url::Url;

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "ref", "ref_src",
    "_ga", "_gl", "spm",
];

/// Second-level labels that sit under a country-code TLD (`example.co.uk`).
const SECOND_LEVEL_LABELS: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}

/// Canonical form of an absolute http(s) URL.
///
/// Lowercases scheme and host, drops fragment, default port and tracking
/// parameters, and strips a trailing slash from non-root paths.
/// Returns `None` for unparsable or non-http(s) input.
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    // `Url` already normalizes scheme/host case and omits known default ports.

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

/// Canonical form, falling back to the trimmed input when it cannot be parsed.
pub fn canonical_key(raw: &str) -> String {
    canonicalize(raw).unwrap_or_else(|| raw.trim().to_string())
}

/// Registered domain (eTLD+1) approximation: the last two host labels, or
/// three when the second-to-last is a common second-level label under a
/// two-letter country code. A leading `www.` never matters.
pub fn registered_domain(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if url.host().is_some_and(|h| !matches!(h, url::Host::Domain(_))) {
        return Some(host);
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if tld.len() == 2 && SECOND_LEVEL_LABELS.contains(second) => 3,
        _ => 2,
    };
    let start = labels.len().saturating_sub(keep);
    Some(labels[start..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_fragment_and_default_port() {
        assert_eq!(
            canonicalize("HTTPS://Example.COM:443/Path/?utm_source=x&id=7&fbclid=abc#frag").unwrap(),
            "https://example.com/Path?id=7"
        );
    }

    #[test]
    fn drops_empty_query_and_trailing_slash() {
        assert_eq!(
            canonicalize("http://example.com/docs/?utm_medium=email").unwrap(),
            "http://example.com/docs"
        );
        assert_eq!(canonicalize("http://example.com").unwrap(), "http://example.com/");
    }

    #[test]
    fn keeps_non_default_port() {
        assert_eq!(
            canonicalize("http://example.com:8080/a").unwrap(),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn rejects_non_http() {
        assert_eq!(canonicalize("mailto:someone@example.com"), None);
        assert_eq!(canonicalize("not a url"), None);
        assert_eq!(canonical_key(" not a url "), "not a url");
    }

    #[test]
    fn variants_collapse_to_one_key() {
        let a = canonical_key("https://www.rust-lang.org/learn/");
        let b = canonical_key("https://WWW.rust-lang.org/learn?utm_campaign=x#top");
        assert_eq!(a, b);
    }

    #[test]
    fn registered_domain_handles_subdomains() {
        assert_eq!(
            registered_domain("https://docs.example.com/a").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            registered_domain("https://www.example.com").as_deref(),
            Some("example.com")
        );
        assert_eq!(
            registered_domain("https://news.bbc.co.uk/x").as_deref(),
            Some("bbc.co.uk")
        );
        assert_eq!(
            registered_domain("http://127.0.0.1:3000/").as_deref(),
            Some("127.0.0.1")
        );
    }
}
