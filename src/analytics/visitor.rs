//! Visitor context: client IP extraction and pseudonymous hashing
//!
//! Client IP extraction follows the configured trust mode:
//! - Cloudflare: `CF-Connecting-IP`
//! - Standard: RFC 7239 `Forwarded`, then `X-Forwarded-For`
//! - None: the socket remote address

use axum::http::{header::USER_AGENT, HeaderMap};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ProxyConfig, TrustedProxyMode};

/// The request-scoped facts the pipeline needs about a visitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Visitor {
    pub ip: Option<String>,
    pub user_agent: String,
}

impl Visitor {
    pub fn new(ip: Option<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip,
            user_agent: user_agent.into(),
        }
    }

    pub fn from_request(headers: &HeaderMap, socket_addr: IpAddr, proxy: &ProxyConfig) -> Self {
        let ip = extract_client_ip(headers, socket_addr, proxy);
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        Self {
            ip: Some(ip.to_string()),
            user_agent,
        }
    }
}

/// One-way digest of `salt ++ ip`, lower-case hex
pub fn hash_ip(salt: &str, ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract the client IP address from HTTP headers
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, proxy: &ProxyConfig) -> IpAddr {
    match proxy.mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, proxy).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, proxy: &ProxyConfig) -> Option<IpAddr> {
    extract_from_forwarded(headers).or_else(|| extract_from_x_forwarded_for(headers, proxy))
}

/// First `for=` address of an RFC 7239 `Forwarded` header
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let value = param.trim();
            let value = value
                .strip_prefix("for=")
                .or_else(|| value.strip_prefix("For="))?;
            parse_forwarded_node(value)
        })
        .next()
}

/// Accepts `192.0.2.60`, `"192.0.2.60:4711"` and `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    value.rsplit_once(':')?.0.parse().ok()
}

fn extract_from_x_forwarded_for(headers: &HeaderMap, proxy: &ProxyConfig) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    match proxy.num_trusted_proxies {
        Some(num_trusted) if ips.len() > num_trusted => Some(ips[ips.len() - num_trusted - 1]),
        // Not enough hops in the chain, use the leftmost
        Some(_) => ips.first().copied(),
        None => ips.last().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxy(mode: TrustedProxyMode, num_trusted_proxies: Option<usize>) -> ProxyConfig {
        ProxyConfig {
            mode,
            num_trusted_proxies,
        }
    }

    fn socket() -> IpAddr {
        "192.168.1.1".parse().unwrap()
    }

    #[test]
    fn test_hash_is_deterministic_and_salted() {
        let a = hash_ip("salt", "123.123.123.123");
        assert_eq!(a, hash_ip("salt", "123.123.123.123"));
        assert_ne!(a, hash_ip("other", "123.123.123.123"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("123.123"));
    }

    #[test]
    fn test_none_mode_uses_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));

        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::None, None));
        assert_eq!(ip, socket());
    }

    #[test]
    fn test_cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));

        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::Cloudflare, None));
        assert_eq!(ip, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_cloudflare_missing_header_falls_back() {
        let ip = extract_client_ip(
            &HeaderMap::new(),
            socket(),
            &proxy(TrustedProxyMode::Cloudflare, None),
        );
        assert_eq!(ip, socket());
    }

    #[test]
    fn test_x_forwarded_for_rightmost_without_trust_count() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );

        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::Standard, None));
        assert_eq!(ip, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_x_forwarded_for_skips_trusted_hops() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1, 10.0.0.1"),
        );

        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::Standard, Some(1)));
        assert_eq!(ip, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_header_with_port_and_ipv6() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:4711\";proto=https, for=198.51.100.1"),
        );
        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::Standard, None));
        assert_eq!(ip, "2001:db8::1".parse::<IpAddr>().unwrap());

        let mut headers = HeaderMap::new();
        headers.insert("forwarded", HeaderValue::from_static("for=192.0.2.60:8080"));
        let ip = extract_client_ip(&headers, socket(), &proxy(TrustedProxyMode::Standard, None));
        assert_eq!(ip, "192.0.2.60".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_visitor_from_request() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 Test"));

        let visitor = Visitor::from_request(&headers, socket(), &proxy(TrustedProxyMode::None, None));
        assert_eq!(visitor.ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(visitor.user_agent, "Mozilla/5.0 Test");
    }
}
