//! Subscription list fetching.
//!
//! Downloads the candidate list over plain HTTP and splits it into one
//! proxy URI per line. Bodies may arrive base64-encoded as a transport
//! wrapper; a failed decode means the body was already plain text.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// HTTP fetch timeout for subscription URLs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for the subscription fetch.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch the subscription and return its candidate URIs in list order.
///
/// Uses a direct (no-proxy) client: the subscription must be reachable
/// before any tunnel exists. An empty list after filtering is an error —
/// there is nothing to probe.
pub async fn fetch_candidates(url: &str) -> anyhow::Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build subscription HTTP client: {e}"))?;

    let resp = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            anyhow::anyhow!("subscription fetch timed out: {url}")
        } else if e.is_connect() {
            anyhow::anyhow!("failed to connect to subscription URL: {url}: {e}")
        } else {
            anyhow::anyhow!("subscription fetch failed: {url}: {e}")
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("subscription returned HTTP {status}: {url}");
    }

    let body = resp
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("failed to read subscription response body: {e}"))?;

    let candidates = split_candidates(&body);
    if candidates.is_empty() {
        anyhow::bail!("subscription contains no candidates: {url}");
    }
    Ok(candidates)
}

/// Split a subscription body into trimmed, non-blank lines.
///
/// A body that decodes as one base64 document is unwrapped first;
/// anything else is treated as plain text.
pub fn split_candidates(body: &str) -> Vec<String> {
    let content = match BASE64.decode(body.trim()) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    };

    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stable reorder putting candidates of `scheme` first.
///
/// Keeps every candidate; relative order inside each partition is
/// unchanged.
pub fn prefer_scheme(candidates: Vec<String>, scheme: &str) -> Vec<String> {
    let prefix = format!("{scheme}://");
    let (mut preferred, rest): (Vec<String>, Vec<String>) = candidates
        .into_iter()
        .partition(|candidate| candidate.starts_with(&prefix));
    preferred.extend(rest);
    preferred
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_text_lines() {
        let body = "vless://a@h1:1\n\nvless://b@h2:2\n   \ntrojan://c@h3:3\n";
        let candidates = split_candidates(body);
        assert_eq!(
            candidates,
            vec!["vless://a@h1:1", "vless://b@h2:2", "trojan://c@h3:3"]
        );
    }

    #[test]
    fn split_base64_body() {
        let plain = "vless://a@h1:1\nvless://b@h2:2\n";
        let encoded = BASE64.encode(plain);
        let candidates = split_candidates(&encoded);
        assert_eq!(candidates, vec!["vless://a@h1:1", "vless://b@h2:2"]);
    }

    #[test]
    fn split_trims_surrounding_whitespace() {
        let candidates = split_candidates("  vless://a@h1:1  \n\t vless://b@h2:2\t\n");
        assert_eq!(candidates, vec!["vless://a@h1:1", "vless://b@h2:2"]);
    }

    #[test]
    fn empty_body_yields_no_candidates() {
        assert!(split_candidates("").is_empty());
        assert!(split_candidates("\n\n   \n").is_empty());
    }

    #[test]
    fn prefer_scheme_is_stable() {
        let candidates = vec![
            "trojan://a@h1:1".to_string(),
            "vless://b@h2:2".to_string(),
            "trojan://c@h3:3".to_string(),
            "vless://d@h4:4".to_string(),
        ];
        let reordered = prefer_scheme(candidates, "vless");
        assert_eq!(
            reordered,
            vec![
                "vless://b@h2:2",
                "vless://d@h4:4",
                "trojan://a@h1:1",
                "trojan://c@h3:3",
            ]
        );
    }

    #[test]
    fn prefer_scheme_without_matches_keeps_order() {
        let candidates = vec!["trojan://a@h1:1".to_string(), "trojan://c@h3:3".to_string()];
        let reordered = prefer_scheme(candidates.clone(), "vless");
        assert_eq!(reordered, candidates);
    }
}
