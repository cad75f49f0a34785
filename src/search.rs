//! Search interception
//!
//! Search-shaped requests are answered from the crawled content index rather
//! than the origin. Losing search degrades the mirror less than losing the
//! page, so index failures turn into an empty, flagged reply instead of an
//! error status.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use wreq::Client;

use crate::{
    models::{SearchReply, SearchResultEntry},
    target::Target,
};

/// Longest snippet kept when the index returns no cropped excerpt
const SNIPPET_CHARS: usize = 240;

/// A page as the content index returns it, ranked by the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: Option<f64>,
}

/// Why the index could not answer
#[derive(Debug)]
pub enum IndexError {
    /// Target has no index to query
    NoIndex,
    /// Network failure or timeout
    Request(String),
    /// Index answered with a non-success status
    Status(u16),
    /// Index reply could not be decoded
    Decode(String),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::NoIndex => write!(f, "no content index configured"),
            IndexError::Request(msg) => write!(f, "index request failed: {}", msg),
            IndexError::Status(status) => write!(f, "index returned status {}", status),
            IndexError::Decode(msg) => write!(f, "index reply malformed: {}", msg),
        }
    }
}

impl std::error::Error for IndexError {}

/// External content index, queried by free text within one named index
#[async_trait]
pub trait ContentIndex: Send + Sync {
    async fn search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;
}

/// Meilisearch-compatible index client (`POST /indexes/{index}/search`)
pub struct MeiliIndex {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for MeiliIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeiliIndex")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeiliQuery<'a> {
    q: &'a str,
    limit: usize,
    attributes_to_crop: [&'static str; 1],
    crop_length: usize,
    show_ranking_score: bool,
}

#[derive(Deserialize)]
struct MeiliReply {
    #[serde(default)]
    hits: Vec<MeiliHit>,
}

#[derive(Deserialize)]
struct MeiliHit {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    excerpt: Option<String>,
    #[serde(default, rename = "_formatted")]
    formatted: Option<MeiliFormatted>,
    #[serde(default, rename = "_rankingScore")]
    ranking_score: Option<f64>,
}

#[derive(Deserialize)]
struct MeiliFormatted {
    #[serde(default)]
    content: Option<String>,
}

impl From<MeiliHit> for IndexHit {
    fn from(hit: MeiliHit) -> Self {
        let snippet = hit
            .formatted
            .and_then(|f| f.content)
            .or(hit.excerpt)
            .or(hit.content)
            .map(|text| truncate_chars(&text, SNIPPET_CHARS))
            .unwrap_or_default();
        IndexHit {
            title: hit.title.unwrap_or_else(|| hit.url.clone()),
            url: hit.url,
            snippet,
            score: hit.ranking_score,
        }
    }
}

impl MeiliIndex {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn search_url(&self, index: &str) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::Request("index URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["indexes", index, "search"]);
        Ok(url)
    }
}

#[async_trait]
impl ContentIndex for MeiliIndex {
    async fn search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        let url = self.search_url(index)?;
        let payload = serde_json::to_vec(&MeiliQuery {
            q: query,
            limit,
            attributes_to_crop: ["content"],
            crop_length: 40,
            show_ranking_score: true,
        })
        .map_err(|e| IndexError::Request(e.to_string()))?;

        let mut request = self
            .client
            .post(url.as_str())
            .header("content-type", "application/json")
            .body(payload);
        if let Some(key) = &self.api_key {
            request = request.header("authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(IndexError::Status(status));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        let reply: MeiliReply =
            serde_json::from_slice(&body).map_err(|e| IndexError::Decode(e.to_string()))?;

        Ok(reply.hits.into_iter().map(IndexHit::from).collect())
    }
}

/// Answer a search from the index named by the target.
///
/// Results keep the index's order. Every URL is relocated under the proxy
/// prefix. An empty query returns an empty set without touching the index.
pub async fn answer(
    query_text: &str,
    target: &Target,
    index: &dyn ContentIndex,
    limit: usize,
) -> SearchReply {
    let query = query_text.trim();
    let mut reply = SearchReply {
        query: query.to_string(),
        total: 0,
        results: Vec::new(),
        index: target.index_name.clone(),
        run_id: target.run_id.clone(),
        degraded: false,
    };

    if query.is_empty() {
        debug!("Empty search query, returning no results");
        return reply;
    }

    let hits = match target.index_name.as_deref() {
        Some(name) => index.search(name, query, limit).await,
        None => Err(IndexError::NoIndex),
    };

    match hits {
        Ok(hits) => {
            reply.results = hits
                .into_iter()
                .map(|hit| SearchResultEntry {
                    url: target.rules.rewrite_url(&hit.url).unwrap_or(hit.url),
                    title: hit.title,
                    snippet: hit.snippet,
                    score: hit.score,
                })
                .collect();
            reply.total = reply.results.len();
            info!(
                query = %query,
                index = ?target.index_name,
                run_id = ?target.run_id,
                total = reply.total,
                "Search answered from index"
            );
        }
        Err(e) => {
            warn!(
                query = %query,
                index = ?target.index_name,
                run_id = ?target.run_id,
                error = %e,
                "Content index unavailable, returning empty results"
            );
            reply.degraded = true;
        }
    }

    reply
}

/// True when the client would rather have a page than JSON
pub fn prefers_html(accept: Option<&str>) -> bool {
    accept.is_some_and(|accept| {
        let accept = accept.to_ascii_lowercase();
        accept.contains("text/html") && !accept.starts_with("application/json")
    })
}

/// Render a reply as a minimal results page for browser navigations.
pub fn render_html(reply: &SearchReply) -> String {
    let mut page = String::with_capacity(512 + reply.results.len() * 256);
    page.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Search: ");
    page.push_str(&escape_html(&reply.query));
    page.push_str("</title></head><body>\n<h1>Results for &ldquo;");
    page.push_str(&escape_html(&reply.query));
    page.push_str("&rdquo;</h1>\n");

    if reply.results.is_empty() {
        page.push_str("<p class=\"no-results\">No results found.</p>\n");
    } else {
        page.push_str("<ol class=\"results\">\n");
        for entry in &reply.results {
            page.push_str(&format!(
                "<li><a href=\"{}\">{}</a><p>{}</p></li>\n",
                escape_html(&entry.url),
                escape_html(&entry.title),
                escape_html(&entry.snippet)
            ));
        }
        page.push_str("</ol>\n");
    }
    page.push_str("</body></html>\n");
    page
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

/// In-memory index for tests
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MemoryIndex {
        pub indexes: HashMap<String, Vec<IndexHit>>,
        pub unavailable: bool,
    }

    impl MemoryIndex {
        pub fn with_hits(index: &str, hits: Vec<IndexHit>) -> Self {
            let mut indexes = HashMap::new();
            indexes.insert(index.to_string(), hits);
            Self {
                indexes,
                unavailable: false,
            }
        }
    }

    pub fn hit(title: &str, url: &str) -> IndexHit {
        IndexHit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: format!("About {}", title),
            score: Some(1.0),
        }
    }

    #[async_trait]
    impl ContentIndex for MemoryIndex {
        async fn search(
            &self,
            index: &str,
            query: &str,
            limit: usize,
        ) -> Result<Vec<IndexHit>, IndexError> {
            if self.unavailable {
                return Err(IndexError::Request("connection refused".to_string()));
            }
            let query = query.to_lowercase();
            Ok(self
                .indexes
                .get(index)
                .map(|hits| {
                    hits.iter()
                        .filter(|h| {
                            h.title.to_lowercase().contains(&query)
                                || h.snippet.to_lowercase().contains(&query)
                        })
                        .take(limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
