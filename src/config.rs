//! Configuration module for environment variables

use std::{
    env,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 8080)
    pub port: u16,
    /// Log level (default: info)
    pub log_level: String,
    /// Path prefix under which the origin is exposed (default: /proxy/)
    pub proxy_prefix: String,
    /// Maximum concurrent origin fetches (default: 100)
    pub max_concurrent: usize,
    /// Origin fetch timeout in seconds (default: 30)
    pub origin_timeout: u64,
    /// Base URL of the content index service (default: http://127.0.0.1:7700)
    pub index_url: String,
    /// Bearer key for the content index, if it requires one
    pub index_api_key: Option<String>,
    /// Content index query timeout in seconds (default: 5)
    pub index_timeout: u64,
    /// Maximum search results returned per query (default: 20)
    pub search_limit: usize,
    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,
    /// Maximum response body size in bytes (default: 50MB)
    pub max_response_body_size: usize,
    /// Server request timeout in seconds (default: 120)
    pub server_timeout: u64,
    /// Browser profile the origin client emulates unless a target overrides it
    pub tls_profile: Option<String>,
    /// Blocked IP ranges for SSRF protection (internal networks)
    pub blocked_ip_ranges: Vec<IpRange>,
    /// Allow targets on private/internal IPs (default: false)
    pub allow_private_ips: bool,
}

/// Represents an IP range for blocking
#[derive(Debug, Clone)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    fn v4(start: [u8; 4], end: [u8; 4]) -> Self {
        Self {
            start: IpAddr::V4(Ipv4Addr::from(start)),
            end: IpAddr::V4(Ipv4Addr::from(end)),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 8080),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            proxy_prefix: normalize_prefix(
                &env::var("PROXY_PREFIX").unwrap_or_else(|_| "/proxy/".to_string()),
            ),
            max_concurrent: env_parse("MAX_CONCURRENT", 100),
            origin_timeout: env_parse("ORIGIN_TIMEOUT", 30),
            index_url: env::var("INDEX_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:7700".to_string()),
            index_api_key: env::var("INDEX_API_KEY").ok().filter(|k| !k.is_empty()),
            index_timeout: env_parse("INDEX_TIMEOUT", 5),
            search_limit: env_parse("SEARCH_LIMIT", 20),
            max_request_body_size: env_parse("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024),
            max_response_body_size: env_parse("MAX_RESPONSE_BODY_SIZE", 50 * 1024 * 1024),
            server_timeout: env_parse("SERVER_TIMEOUT", 120),
            tls_profile: env::var("TLS_PROFILE").ok().filter(|p| !p.is_empty()),
            blocked_ip_ranges: Self::default_blocked_ranges(),
            allow_private_ips: env::var("ALLOW_PRIVATE_IPS")
                .ok()
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Default blocked IP ranges (RFC 1918, loopback, link-local, etc.)
    fn default_blocked_ranges() -> Vec<IpRange> {
        vec![
            // Loopback
            IpRange::v4([127, 0, 0, 0], [127, 255, 255, 255]),
            // Private Class A
            IpRange::v4([10, 0, 0, 0], [10, 255, 255, 255]),
            // Private Class B
            IpRange::v4([172, 16, 0, 0], [172, 31, 255, 255]),
            // Private Class C
            IpRange::v4([192, 168, 0, 0], [192, 168, 255, 255]),
            // Link-local, including cloud metadata endpoints
            IpRange::v4([169, 254, 0, 0], [169, 254, 255, 255]),
            // IPv6 loopback
            IpRange {
                start: IpAddr::V6(Ipv6Addr::LOCALHOST),
                end: IpAddr::V6(Ipv6Addr::LOCALHOST),
            },
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Force a prefix into `/segment/` form so joins never double or drop a slash.
pub fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("/proxy/"), "/proxy/");
        assert_eq!(normalize_prefix("proxy"), "/proxy/");
        assert_eq!(normalize_prefix("/mirror"), "/mirror/");
        assert_eq!(normalize_prefix(" /a/b/ "), "/a/b/");
        assert_eq!(normalize_prefix("/"), "/");
    }

    #[test]
    fn test_default_ranges_cover_metadata_endpoint() {
        let ranges = Config::default_blocked_ranges();
        let metadata = IpAddr::V4(Ipv4Addr::new(169, 254, 169, 254));
        assert!(ranges.iter().any(|r| match (r.start, r.end, metadata) {
            (IpAddr::V4(s), IpAddr::V4(e), IpAddr::V4(ip)) => s <= ip && ip <= e,
            _ => false,
        }));
    }
}
