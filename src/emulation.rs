//! Browser emulation profiles for the origin client
//!
//! Origins that sit behind bot protection serve challenge pages to clients
//! with a non-browser TLS/HTTP2 fingerprint. The origin client therefore
//! impersonates a browser; the profile is chosen per target, falling back to
//! the process default (`TLS_PROFILE`) and then to wreq-util's latest Chrome.
//!
//! Profile names are the serde names of `wreq_util::Emulation` variants
//! (e.g. "chrome_131", "firefox_139") and are discovered from
//! `Emulation::VARIANTS`, so new browser versions appear without code changes.

use strum::VariantArray;
use wreq_util::Emulation;

use crate::{config::Config, error::ProxyError};

/// Parse a profile string into an Emulation variant.
///
/// Returns the rejected name on failure.
pub fn parse_tls_profile(profile: &str) -> Result<Emulation, String> {
    serde_json::from_str(&format!("\"{}\"", profile)).map_err(|_| profile.to_string())
}

/// All profile names, e.g. ["chrome_100", ..., "firefox_139"]
pub fn available_profiles() -> Vec<String> {
    Emulation::VARIANTS.iter().filter_map(profile_name).collect()
}

fn profile_name(emulation: &Emulation) -> Option<String> {
    serde_json::to_string(emulation)
        .ok()
        .map(|s| s.trim_matches('"').to_string())
}

/// Pick the profile for a new target: explicit request, then process default,
/// then wreq-util's default. Returns the emulation with its canonical name.
pub fn resolve_profile(
    requested: Option<&str>,
    config: &Config,
) -> Result<(Emulation, String), ProxyError> {
    let chosen = requested
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or(config.tls_profile.as_deref());

    let emulation = match chosen {
        Some(name) => parse_tls_profile(name)
            .map_err(|invalid| ProxyError::invalid_profile(&invalid, available_profiles()))?,
        None => Emulation::default(),
    };
    let name = profile_name(&emulation).unwrap_or_else(|| "default".to_string());
    Ok((emulation, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_known_profiles() {
        assert!(parse_tls_profile("chrome_131").is_ok());
        assert!(parse_tls_profile("firefox_139").is_ok());
    }

    #[test]
    fn test_parse_invalid_profile() {
        assert_eq!(parse_tls_profile("invalid_999").unwrap_err(), "invalid_999");
    }

    #[test]
    fn test_resolve_prefers_requested_profile() {
        let mut config = Config::from_env();
        config.tls_profile = Some("chrome_131".to_string());
        let (_, name) = resolve_profile(Some("firefox_139"), &config).unwrap();
        assert_eq!(name, "firefox_139");
        let (_, name) = resolve_profile(None, &config).unwrap();
        assert_eq!(name, "chrome_131");
    }

    #[test]
    fn test_resolve_rejects_unknown_profile() {
        let config = Config::from_env();
        let err = resolve_profile(Some("netscape_4"), &config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidProfile);
        assert!(err.response.available_profiles.is_some());
    }

    #[test]
    fn test_available_profiles_not_empty() {
        let profiles = available_profiles();
        assert!(profiles.iter().any(|p| p.starts_with("chrome_")));
    }
}
