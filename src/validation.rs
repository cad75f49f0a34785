//! Origin URL validation and SSRF protection module

use std::net::{IpAddr, ToSocketAddrs};
use url::Url;

use crate::config::Config;
use crate::error::ProxyError;

/// Allowed URL schemes for origins
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// Blocked hostnames (case-insensitive)
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal", // GCP metadata
    "metadata.google.com",      // GCP metadata alt
    "instance-data",            // AWS metadata hostname
];

/// Validate an operator-supplied origin base URL
///
/// Checks:
/// 1. URL is absolute and the scheme is http or https
/// 2. Hostname is present and not on the blocklist
/// 3. Resolved IP is not in private/internal ranges (unless allowed)
///
/// The fragment is dropped; it never reaches the origin anyway.
pub fn validate_origin_url(url_str: &str, config: &Config) -> Result<Url, ProxyError> {
    let mut url = Url::parse(url_str.trim())
        .map_err(|e| ProxyError::invalid_configuration(format!("Invalid origin URL: {}", e)))?;

    let scheme = url.scheme().to_lowercase();
    if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
        return Err(ProxyError::invalid_configuration(format!(
            "Origin scheme '{}' not allowed. Only http and https are permitted.",
            scheme
        )));
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => {
            return Err(ProxyError::invalid_configuration(
                "Origin URL must have a valid hostname.",
            ))
        }
    };

    if !config.allow_private_ips {
        let host_lower = host.to_lowercase();
        if BLOCKED_HOSTNAMES.iter().any(|&blocked| host_lower == blocked) {
            return Err(ProxyError::invalid_configuration(format!(
                "Hostname '{}' is blocked for security reasons.",
                host
            )));
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            if is_ip_blocked(&ip, config) {
                return Err(ProxyError::invalid_configuration(format!(
                    "IP address '{}' is blocked. Private/internal IPs are not allowed.",
                    ip
                )));
            }
        } else {
            let port = url.port_or_known_default().unwrap_or(80);
            let addr = format!("{}:{}", host, port);

            if let Ok(mut addrs) = addr.to_socket_addrs() {
                if let Some(socket_addr) = addrs.next() {
                    let ip = socket_addr.ip();
                    if is_ip_blocked(&ip, config) {
                        return Err(ProxyError::invalid_configuration(format!(
                            "Hostname '{}' resolves to blocked IP '{}'. Private/internal IPs are not allowed.",
                            host, ip
                        )));
                    }
                }
            }
            // Unresolvable hosts are accepted; fetches report DNS_ERROR per request
        }
    }

    url.set_fragment(None);
    Ok(url)
}

/// Check if an IP address is in the blocked ranges
fn is_ip_blocked(ip: &IpAddr, config: &Config) -> bool {
    if config
        .blocked_ip_ranges
        .iter()
        .any(|range| is_ip_in_range(ip, &range.start, &range.end))
    {
        return true;
    }

    match ip {
        IpAddr::V4(ipv4) => {
            let first = ipv4.octets()[0];
            // 0.0.0.0/8 current network, 224.0.0.0/4 multicast, 240.0.0.0/4 reserved
            first == 0 || first >= 224
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            // fe80::/10 link-local, fc00::/7 unique local
            (segments[0] & 0xffc0) == 0xfe80 || (segments[0] & 0xfe00) == 0xfc00
        }
    }
}

/// Check if an IP is within a range (simple comparison)
fn is_ip_in_range(ip: &IpAddr, start: &IpAddr, end: &IpAddr) -> bool {
    match (ip, start, end) {
        (IpAddr::V4(ip), IpAddr::V4(s), IpAddr::V4(e)) => {
            let ip_num = u32::from(*ip);
            ip_num >= u32::from(*s) && ip_num <= u32::from(*e)
        }
        (IpAddr::V6(ip), IpAddr::V6(s), IpAddr::V6(e)) => {
            let ip_num = u128::from(*ip);
            ip_num >= u128::from(*s) && ip_num <= u128::from(*e)
        }
        _ => false, // Mismatched IP versions
    }
}

/// Sanitize a URL for logging by removing credentials
pub fn sanitize_url_for_logging(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("***");
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "[invalid URL]".to_string(),
    }
}
