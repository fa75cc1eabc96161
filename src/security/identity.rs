//! Client identity used as the rate limiting key.

use std::net::SocketAddr;

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Identify the caller: the first hop of `X-Forwarded-For`, then
/// `X-Real-IP`, then the connection address. First non-empty wins.
pub fn client_identifier(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    match remote {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_precedence() {
        let remote: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, Some(remote)), "10.0.0.9");
        assert_eq!(client_identifier(&headers, None), "unknown");

        headers.insert(X_REAL_IP, HeaderValue::from_static("192.168.1.4"));
        assert_eq!(client_identifier(&headers, Some(remote)), "192.168.1.4");

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.1.1.1"));
        assert_eq!(client_identifier(&headers, Some(remote)), "203.0.113.7");
    }

    #[test]
    fn test_empty_headers_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(" "));
        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identifier(&headers, None), "198.51.100.2");
    }
}
