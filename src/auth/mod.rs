pub mod hmac;
pub mod rate_limit;
pub mod session;
pub mod users;

use crate::types::Role;
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// How the current request was authenticated. Injected into request
/// extensions by the HMAC and session middlewares.
#[derive(Clone, Debug)]
pub enum AuthContext {
    HmacClient,
    WebSession { username: String, role: Role },
}

/// Resolve the client address: `CF-Connecting-IP`, then the first
/// `X-Forwarded-For` element, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        let ip = ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "203.0.113.9:4444".parse().unwrap()
    }

    #[test]
    fn prefers_cf_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("198.51.100.10"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.0.2.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "198.51.100.10");
    }

    #[test]
    fn falls_back_to_first_forwarded_element() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.0.2.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer()), "192.0.2.1");
    }

    #[test]
    fn falls_back_to_peer_address() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "203.0.113.9");
    }
}
