//! Origin fetcher
//!
//! Forwards a content-shaped request to the configured origin and turns the
//! origin's reply into a client response: redirects are relocated instead of
//! followed, and textual bodies go through the rewriter.

use std::{borrow::Cow, time::Duration, time::Instant};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use tracing::{debug, error, info};
use url::Url;
use wreq::{redirect, Client};
use wreq_util::Emulation;

use crate::{
    error::{classify_wreq_error, ProxyError},
    rewriter::rewrite,
    target::Target,
    validation::sanitize_url_for_logging,
};

/// Client request headers passed on to the origin
const FORWARDED_REQUEST_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "cache-control",
    "content-type",
    "cookie",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "if-unmodified-since",
    "range",
];

/// Origin response headers never copied to the client
const DROPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    // recomputed from the (possibly rewritten) body
    "content-length",
];

/// Build the origin client for one target: browser emulation, bounded
/// timeout, redirects surfaced to the caller.
pub fn build_origin_client(emulation: Emulation, timeout_secs: u64) -> Result<Client, ProxyError> {
    Client::builder()
        .emulation(emulation)
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| {
            error!(error = %e, "Failed to build origin client");
            ProxyError::unknown(format!("Failed to build origin client: {}", e))
        })
}

/// What the origin answered
#[derive(Debug)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Absolute origin URL for a path relative to the proxy prefix.
///
/// The prefix root maps to the configured base URL itself (which may carry
/// a path and query); anything below it maps onto the origin's root,
/// mirroring how the rewriter relocates origin paths.
pub fn origin_url(target: &Target, rest: &str, query: Option<&str>) -> Url {
    let mut url = target.origin.clone();
    let query = query.filter(|q| !q.is_empty());
    if !rest.is_empty() {
        url.set_path(&format!("/{}", rest));
        url.set_query(query);
    } else if query.is_some() {
        url.set_query(query);
    }
    url
}

/// Where the prefix root should send the browser when the base URL sits
/// below the origin root, so the address bar mirrors the origin path and
/// document-relative references resolve against it.
pub fn entry_location(target: &Target, query: Option<&str>) -> Option<String> {
    let base_path = target.origin.path();
    if base_path == "/" {
        return None;
    }
    let mut location = target.rules.proxy_path(base_path);
    if let Some(query) = query.filter(|q| !q.is_empty()).or(target.origin.query()) {
        location.push('?');
        location.push_str(query);
    }
    Some(location)
}

/// Client headers that may be forwarded to the origin
pub fn forwardable_headers(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter(|(name, _)| FORWARDED_REQUEST_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

/// Perform the outbound request.
///
/// Network failures and timeouts become `OriginUnreachable`-class errors;
/// any HTTP status the origin returns, including 4xx/5xx, is a success here.
pub async fn fetch(
    target: &Target,
    method: &Method,
    rest: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
    max_response_size: usize,
) -> Result<OriginResponse, ProxyError> {
    let url = origin_url(target, rest, query);
    let safe_url = sanitize_url_for_logging(url.as_str());

    let method: wreq::Method = method
        .as_str()
        .parse()
        .map_err(|_| ProxyError::invalid_request(format!("Invalid HTTP method: {}", method)))?;

    debug!(url = %safe_url, method = %method, "Fetching from origin");

    let mut request_builder = target.client.request(method, url.as_str());
    for (name, value) in forwardable_headers(headers) {
        request_builder = request_builder.header(name, value);
    }
    if !body.is_empty() {
        request_builder = request_builder.body(body);
    }

    let start = Instant::now();
    let response = request_builder.send().await.map_err(|e| {
        let (code, message) = classify_wreq_error(&e);
        error!(url = %safe_url, error = %e, code = ?code, "Origin request failed");
        ProxyError::origin_unreachable(code, message)
    })?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|_| ProxyError::unknown("Origin returned an invalid status code"))?;

    let mut response_headers = HeaderMap::new();
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_headers.append(name, value);
        }
    }

    let body = read_response_body_with_limit(response, max_response_size, &safe_url).await?;

    info!(
        url = %safe_url,
        status = status.as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        body_size = body.len(),
        "Origin request completed"
    );

    Ok(OriginResponse {
        status,
        headers: response_headers,
        body,
    })
}

/// Read response body with size limit to prevent OOM
async fn read_response_body_with_limit(
    response: wreq::Response,
    max_size: usize,
    safe_url: &str,
) -> Result<Bytes, ProxyError> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_size as u64 {
            return Err(ProxyError::response_too_large(content_length, max_size));
        }
    }

    let body_bytes = response.bytes().await.map_err(|e| {
        let (code, message) = classify_wreq_error(&e);
        error!(url = %safe_url, error = %e, "Failed to read origin body");
        ProxyError::origin_unreachable(code, message)
    })?;

    if body_bytes.len() > max_size {
        return Err(ProxyError::response_too_large(
            body_bytes.len() as u64,
            max_size,
        ));
    }

    Ok(body_bytes)
}

/// Shape an origin reply for the client: relocate `Location`, scope cookies
/// to the proxy host, rewrite textual bodies.
pub fn into_client_response(origin: OriginResponse, target: &Target) -> Response {
    let content_type = origin
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    // A body the client would still have to decode cannot be rewritten safely
    let still_encoded = origin
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|enc| !enc.trim().eq_ignore_ascii_case("identity"));

    // Rewriting would invalidate the origin's Content-Range
    let partial = origin.status == StatusCode::PARTIAL_CONTENT;

    let rewritten = if still_encoded || partial {
        None
    } else {
        match rewrite(&origin.body, content_type.as_deref(), &target.rules) {
            Cow::Owned(buf) => Some(buf),
            Cow::Borrowed(_) => None,
        }
    };
    let body = rewritten.map(Bytes::from).unwrap_or(origin.body);

    let mut headers = HeaderMap::new();
    for (name, value) in origin.headers.iter() {
        if DROPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let value = if name == header::LOCATION {
            relocate_header(value, |v| target.rules.rewrite_url(v))
        } else if name == header::SET_COOKIE {
            relocate_header(value, |v| Some(strip_cookie_domain(v)))
        } else {
            value.clone()
        };
        headers.append(name.clone(), value);
    }

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = origin.status;
    *response.headers_mut() = headers;
    response
}

fn relocate_header(value: &HeaderValue, f: impl FnOnce(&str) -> Option<String>) -> HeaderValue {
    value
        .to_str()
        .ok()
        .and_then(f)
        .and_then(|v| HeaderValue::from_str(&v).ok())
        .unwrap_or_else(|| value.clone())
}

/// Drop the `Domain=` attribute so the browser scopes the cookie to the proxy.
fn strip_cookie_domain(cookie: &str) -> String {
    cookie
        .split(';')
        .filter(|attr| {
            !attr
                .trim_start()
                .get(..7)
                .is_some_and(|name| name.eq_ignore_ascii_case("domain="))
        })
        .collect::<Vec<_>>()
        .join(";")
}
