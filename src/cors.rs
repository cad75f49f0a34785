//! CORS and security header normalization
//!
//! Mirrored pages are served from the proxy's host, so origin policies that
//! pin framing, embedding or cross-origin access to the origin's own host
//! would break them. Those headers are stripped and replaced by permissive
//! CORS headers on every response.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use tower_http::cors::{AllowHeaders, AllowMethods, Any, CorsLayer};
use tracing::debug;

/// Origin response headers removed before the client sees them
const STRIPPED_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "cross-origin-opener-policy",
    "cross-origin-embedder-policy",
    "cross-origin-resource-policy",
    "strict-transport-security",
];

/// Permissive CORS: any origin, whatever methods and headers the browser
/// asks for, every response header exposed.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(Any)
}

/// Strip restrictive origin headers.
///
/// Runs inside [`cors_layer`], which answers every `OPTIONS` request itself
/// and adds its headers after this strips the origin's.
pub async fn normalize(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    strip_security_headers(response.headers_mut());
    response
}

fn strip_security_headers(headers: &mut HeaderMap) {
    let doomed: Vec<_> = headers
        .keys()
        .filter(|name| {
            let name = name.as_str();
            STRIPPED_HEADERS.contains(&name) || name.starts_with("access-control-")
        })
        .cloned()
        .collect();
    for name in doomed {
        debug!(header = %name, "Stripping origin header");
        headers.remove(name);
    }
}
