//! Request routing
//!
//! Every proxied request is classified once, against a single snapshot of
//! the target, as either a search the index should answer or content the
//! origin should serve.

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use tracing::{debug, info, warn};

use crate::{
    error::ProxyError,
    fetcher::{entry_location, fetch, into_client_response},
    handlers::AppState,
    models::NotConfiguredResponse,
    search::{answer, prefers_html, render_html},
};

/// Path fragments that mark a search endpoint, compound forms first
const PATH_INDICATORS: &[&str] = &[
    "api/search",
    "search/api",
    "search",
    "find",
    "query",
    "lookup",
    "results",
];

/// Ordinary words that contain an indicator but never name a search endpoint
const NON_SEARCH_WORDS: &[&str] = &["research", "findings"];

/// Query keys carrying search text, in priority order
const QUERY_KEYS: &[&str] = &["q", "query", "search", "term", "keyword", "text"];

/// A search the index should answer
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query_text: String,
    /// Request path as the client sent it, prefix included
    pub original_path: String,
    pub path_indicator: &'static str,
    pub query_key: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestShape {
    Search(SearchRequest),
    Content,
}

/// Classify a request by its path below the prefix and its raw query.
///
/// Search needs both a path indicator and a search query key; either one
/// alone is content.
pub fn classify(rest: &str, query: Option<&str>, original_path: &str) -> RequestShape {
    let Some(path_indicator) = path_indicator(rest) else {
        return RequestShape::Content;
    };
    let Some((query_key, query_text)) = query.and_then(search_param) else {
        return RequestShape::Content;
    };
    RequestShape::Search(SearchRequest {
        query_text,
        original_path: original_path.to_string(),
        path_indicator,
        query_key,
    })
}

fn path_indicator(rest: &str) -> Option<&'static str> {
    let mut path = rest.trim_matches('/').to_ascii_lowercase();
    for word in NON_SEARCH_WORDS {
        path = path.replace(word, "/");
    }
    PATH_INDICATORS
        .iter()
        .copied()
        .find(|indicator| path.contains(indicator))
}

/// First non-empty value among the search keys by priority. A search key
/// present with only empty values still counts, with empty text.
fn search_param(query: &str) -> Option<(&'static str, String)> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();

    let mut empty_match = None;
    for &key in QUERY_KEYS {
        for (name, value) in pairs.iter().filter(|(name, _)| name == key) {
            if !value.trim().is_empty() {
                return Some((key, value.clone()));
            }
            debug!(key = %name, "Search key present without a value");
            empty_match.get_or_insert(key);
        }
    }
    empty_match.map(|key| (key, String::new()))
}

/// Path below the proxy prefix, or `None` when the request is outside it.
/// The prefix without its trailing slash also matches, as an empty path.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix).or_else(|| {
        let bare = prefix.trim_end_matches('/');
        (!bare.is_empty() && path == bare).then_some("")
    })
}

/// Serve one proxied request.
pub async fn route(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let prefix = state.targets.proxy_prefix();
    let Some(rest) = strip_prefix(uri.path(), prefix) else {
        debug!(path = %uri.path(), "Request outside proxy prefix");
        return ProxyError::not_found(format!("No route for {}", uri.path())).into_response();
    };

    // Bare prefix: relative references on the root page must resolve inside it
    if !uri.path().starts_with(prefix) {
        let location = match uri.query() {
            Some(query) => format!("{}?{}", prefix, query),
            None => prefix.to_string(),
        };
        return Redirect::permanent(&location).into_response();
    }

    // One snapshot for the whole request
    let Some(target) = state.targets.active() else {
        info!(path = %uri.path(), "No active target, answering not configured");
        return (StatusCode::OK, Json(NotConfiguredResponse::new(prefix))).into_response();
    };

    if rest.is_empty() {
        if let Some(location) = entry_location(&target, uri.query()) {
            debug!(location = %location, "Sending prefix root to the base page");
            return Redirect::temporary(&location).into_response();
        }
    }

    match classify(rest, uri.query(), uri.path()) {
        RequestShape::Search(search) => {
            info!(
                path = %search.original_path,
                indicator = search.path_indicator,
                key = search.query_key,
                generation = target.generation,
                "Intercepting search request"
            );
            let reply = answer(
                &search.query_text,
                &target,
                state.index.as_ref(),
                state.config.search_limit,
            )
            .await;
            let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
            if prefers_html(accept) {
                Html(render_html(&reply)).into_response()
            } else {
                Json(reply).into_response()
            }
        }
        RequestShape::Content => {
            debug!(
                path = %uri.path(),
                method = %method,
                generation = target.generation,
                "Forwarding content request"
            );
            let _permit = match state.semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => return ProxyError::unknown("Service unavailable").into_response(),
            };
            match fetch(
                &target,
                &method,
                rest,
                uri.query(),
                headers,
                body,
                state.config.max_response_body_size,
            )
            .await
            {
                Ok(origin) => into_client_response(origin, &target),
                Err(e) => {
                    warn!(path = %uri.path(), code = %e.code(), "Origin fetch failed");
                    e.into_response()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(rest: &str, query: &str) -> Option<SearchRequest> {
        match classify(rest, Some(query), &format!("/proxy/{}", rest)) {
            RequestShape::Search(s) => Some(s),
            RequestShape::Content => None,
        }
    }

    #[test]
    fn test_classification_truth_table() {
        assert!(search("search", "q=x").is_some());
        assert_eq!(classify("search", None, "/proxy/search"), RequestShape::Content);
        assert!(search("about", "q=x").is_none());
        let api = search("api/search", "query=y").unwrap();
        assert_eq!(api.path_indicator, "api/search");
        assert_eq!(api.query_key, "query");
        assert_eq!(api.query_text, "y");
        assert_eq!(api.original_path, "/proxy/api/search");
    }

    #[test]
    fn test_indicator_found_inside_path() {
        for path in [
            "site-search",
            "en/search.html",
            "Search/Results",
            "searchresults",
            "sitesearch",
            "SearchResults.aspx",
            "quicksearch",
            "research/search",
        ] {
            assert!(search(path, "q=loans").is_some(), "{}", path);
        }
        assert!(search("", "q=x").is_none());
    }

    #[test]
    fn test_non_search_words_excluded() {
        assert!(search("research", "q=x").is_none());
        assert!(search("about/research-papers", "q=x").is_none());
        assert!(search("findings", "q=x").is_none());
    }

    #[test]
    fn test_compound_indicator_reported() {
        assert_eq!(search("v1/search/api", "q=x").unwrap().path_indicator, "search/api");
        assert_eq!(search("find", "q=x").unwrap().path_indicator, "find");
    }

    #[test]
    fn test_query_key_priority_and_decoding() {
        let s = search("search", "text=low&q=loans+rates&page=2").unwrap();
        assert_eq!(s.query_key, "q");
        assert_eq!(s.query_text, "loans rates");

        let s = search("search", "Q=&keyword=caf%C3%A9").unwrap();
        assert_eq!(s.query_key, "keyword");
        assert_eq!(s.query_text, "café");
    }

    #[test]
    fn test_empty_search_key_still_search() {
        let s = search("search", "q=").unwrap();
        assert_eq!(s.query_key, "q");
        assert!(s.query_text.is_empty());
        assert!(search("search", "page=2").is_none());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("/proxy/about", "/proxy/"), Some("about"));
        assert_eq!(strip_prefix("/proxy/", "/proxy/"), Some(""));
        assert_eq!(strip_prefix("/proxy", "/proxy/"), Some(""));
        assert_eq!(strip_prefix("/proxyfoo", "/proxy/"), None);
        assert_eq!(strip_prefix("/other", "/proxy/"), None);
        assert_eq!(strip_prefix("/anything", "/"), Some("anything"));
    }
}
