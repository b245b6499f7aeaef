//! Handshake URL derivation for standard vs. custom AppSync domains.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::HandshakeError;

/// Matches the canonical AppSync HTTP endpoint host:
/// `{26-char-id}.appsync-api.{region-components}.amazonaws.com(.cn)?`.
static STANDARD_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]{26})\.(appsync-api|gogi-beta)\.([a-zA-Z0-9-]+)\.amazonaws\.com(\.cn)?$")
        .expect("static regex is valid")
});

/// Derives the `wss://` realtime URL for a given HTTPS AppSync endpoint.
/// Standard-domain endpoints get their host rewritten
/// (`appsync-api` → `appsync-realtime-api`, the `gogi-beta` alias →
/// `grt-beta`); anything else is treated as a custom domain and gets
/// `/realtime` appended to its path instead.
pub fn derive_realtime_url(endpoint: &str) -> Result<url::Url, HandshakeError> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| HandshakeError::InvalidEndpoint(endpoint.to_string(), e.to_string()))?;

    if parsed.scheme() != "https" {
        return Err(HandshakeError::InvalidEndpoint(
            endpoint.to_string(),
            "endpoint must use the https scheme".to_string(),
        ));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| HandshakeError::InvalidEndpoint(endpoint.to_string(), "missing host".to_string()))?;

    let mut realtime = parsed.clone();
    realtime
        .set_scheme("wss")
        .expect("wss is a valid scheme for any URL that accepted https");

    if let Some(captures) = STANDARD_DOMAIN.captures(host) {
        let id = &captures[1];
        let segment = match &captures[2] {
            "gogi-beta" => "grt-beta",
            _ => "appsync-realtime-api",
        };
        let region = &captures[3];
        let tld_suffix = captures.get(4).map(|m| m.as_str()).unwrap_or("");
        let realtime_host = format!("{id}.{segment}.{region}.amazonaws.com{tld_suffix}");
        realtime
            .set_host(Some(&realtime_host))
            .map_err(|e| HandshakeError::InvalidEndpoint(endpoint.to_string(), e.to_string()))?;
    } else {
        let mut path = realtime.path().to_string();
        if path.ends_with('/') {
            path.pop();
        }
        path.push_str("/realtime");
        realtime.set_path(&path);
    }

    Ok(realtime)
}

/// Appends the `?header=<base64>&payload=<base64>` query to an
/// already-derived realtime URL.
pub fn append_handshake_query(
    mut realtime_url: url::Url,
    headers: &HashMap<String, String>,
) -> Result<url::Url, HandshakeError> {
    let headers_json = serde_json::to_string(headers)
        .map_err(|e| HandshakeError::InvalidEndpoint(realtime_url.to_string(), e.to_string()))?;
    let header_b64 = STANDARD.encode(headers_json);
    let payload_b64 = STANDARD.encode("{}");

    realtime_url
        .query_pairs_mut()
        .append_pair("header", &header_b64)
        .append_pair("payload", &payload_b64);

    Ok(realtime_url)
}
