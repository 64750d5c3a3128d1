//! Client address extraction.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Determine the client address of a request.
///
/// Proxy headers are only consulted when `trust_proxy_headers` is set: the
/// rightmost `X-Forwarded-For` entry (the one added by the nearest proxy),
/// then `X-Real-IP`. Otherwise, or when neither header holds a valid
/// address, the peer address of the connection is used.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<String> {
    if trust_proxy_headers {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').map(str::trim).find(|s| !s.is_empty()))
            .and_then(|s| s.parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }

        let real_ip = headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return Some(ip.to_string());
        }
    } else if headers.contains_key(X_FORWARDED_FOR) {
        debug!("Ignoring X-Forwarded-For (proxy headers not trusted)");
    }

    peer.map(|addr| addr.ip().to_string())
}
