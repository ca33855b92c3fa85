//! Client identity resolution from proxy headers.
//!
//! The resolved value is the partition key for every counter and ban. It is
//! taken at face value: no IP syntax validation is done, so the network edge
//! must strip or overwrite these headers for untrusted clients.

use axum::http::HeaderMap;

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
/// Header carrying the client address as seen by the edge proxy.
pub const REAL_IP_HEADER: &str = "x-real-ip";
/// Identity used when neither header is present.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Resolve the best-effort caller identity for a request.
///
/// Precedence: first entry of `X-Forwarded-For`, then `X-Real-IP`, then
/// [`UNKNOWN_IDENTITY`]. Blank or non-UTF-8 values count as absent.
pub fn resolve_client_identity(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(identity) = forwarded {
        return identity.to_string();
    }

    header_str(headers, REAL_IP_HEADER)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
