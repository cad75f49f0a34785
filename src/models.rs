//! Request and response models for the operator API and search replies

use serde::{Deserialize, Serialize};

use crate::{target::Target, validation::sanitize_url_for_logging};

/// Operator "configure" call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    /// Absolute http(s) URL of the site to mirror
    #[serde(alias = "origin_base_url")]
    pub origin_base_url: String,

    /// Content index answering this origin's search calls
    #[serde(default, alias = "index_name")]
    pub index_name: Option<String>,

    /// Crawl run that produced the index
    #[serde(default, alias = "run_id")]
    pub run_id: Option<String>,

    /// Serve the target immediately (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Browser profile the origin client emulates (e.g. "chrome_131")
    #[serde(default, alias = "tls_profile")]
    pub tls_profile: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Read-only projection of the active target
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetView {
    pub configured: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub proxy_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_profile: Option<String>,
    pub generation: u64,
}

impl TargetView {
    pub fn unconfigured(proxy_prefix: &str) -> Self {
        Self {
            configured: false,
            enabled: false,
            origin_base_url: None,
            index_name: None,
            run_id: None,
            proxy_prefix: proxy_prefix.to_string(),
            tls_profile: None,
            generation: 0,
        }
    }

    pub fn from_target(target: &Target) -> Self {
        Self {
            configured: true,
            enabled: target.enabled,
            origin_base_url: Some(sanitize_url_for_logging(target.origin.as_str())),
            index_name: target.index_name.clone(),
            run_id: target.run_id.clone(),
            proxy_prefix: target.rules.proxy_prefix().to_string(),
            tls_profile: Some(target.tls_profile.clone()),
            generation: target.generation,
        }
    }
}

/// Reply to a configure or disable call
#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub target: TargetView,
    pub previous: Option<TargetView>,
}

/// Informational reply while no target is being served
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotConfiguredResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub proxy_prefix: String,
}

impl NotConfiguredResponse {
    pub fn new(proxy_prefix: &str) -> Self {
        Self {
            status: "not_configured",
            message: "No target is configured. POST /api/target to start mirroring an origin.",
            proxy_prefix: proxy_prefix.to_string(),
        }
    }
}

/// One search hit, with its URL already relocated under the proxy
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultEntry {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Structured reply to an intercepted search call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReply {
    pub query: String,
    pub total: usize,
    pub results: Vec<SearchResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// True when the index could not be queried and the reply is empty
    pub degraded: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,

    /// Service version
    pub version: &'static str,

    /// Whether a target is being served
    pub serving: bool,

    /// Browser profiles the origin client can emulate
    pub profiles: Vec<String>,
}

impl HealthResponse {
    pub fn new(serving: bool, profiles: Vec<String>) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            serving,
            profiles,
        }
    }
}
