//! Web-search client.
//!
//! Talks to a Bocha-style web-search endpoint: bearer-authenticated POST
//! of `{query, count, summary, freshness}`, results under
//! `data.webPages.value`. Responses are cached per query; timeouts and
//! network errors collapse into empty result sets so the research run
//! keeps going.

use crate::cache::SearchCache;
use crate::error::{Result, SearchError};
use crate::types::SearchResult;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default request timeout.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Query-level web search.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search the web, returning at most `count` results. Transient
    /// provider failures yield an empty list, never an error.
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchResult>>;
}

/// Configuration for the HTTP search client.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Bearer token for the provider.
    pub api_key: String,

    /// Search endpoint URL.
    pub endpoint: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl SearchConfig {
    /// Create a configuration for the given key and endpoint.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            timeout: SEARCH_TIMEOUT,
        }
    }
}

/// HTTP search client with a per-query response cache.
pub struct HttpSearchClient {
    config: SearchConfig,
    client: Client,
    cache: SearchCache,
}

impl HttpSearchClient {
    /// Create a new client.
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SearchError::ClientError(e.to_string()))?;

        Ok(Self {
            config,
            client,
            cache: SearchCache::new(),
        })
    }

    async fn fetch(&self, query: &str, count: usize) -> Vec<SearchResult> {
        let payload = SearchRequest {
            query,
            count,
            summary: true,
            freshness: "noLimit",
        };

        let response = match self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(query, "search timed out");
                return Vec::new();
            }
            Err(e) => {
                warn!(query, error = %e, "search request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(query, status = %response.status(), "search provider returned error status");
            return Vec::new();
        }

        let body: SearchResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(query, error = %e, "search response was not valid JSON");
                return Vec::new();
            }
        };

        if let Some(code) = body.code {
            if code != 200 {
                warn!(query, code, msg = body.msg.as_deref().unwrap_or(""), "search provider error");
                return Vec::new();
            }
        }

        let pages = body
            .data
            .and_then(|d| d.web_pages)
            .map(|w| w.value)
            .unwrap_or_default();

        let results: Vec<SearchResult> = pages
            .into_iter()
            .filter(|p| {
                !p.url.is_empty() && (!p.snippet.is_empty() || !p.summary.is_empty())
            })
            .map(|p| SearchResult {
                url: p.url,
                title: if p.name.is_empty() { "N/A".to_string() } else { p.name },
                summary: if p.summary.is_empty() { p.snippet.clone() } else { p.summary },
                snippet: p.snippet,
                site_name: if p.site_name.is_empty() { "N/A".to_string() } else { p.site_name },
                date: if p.date_published.is_empty() { p.date_last_crawled } else { p.date_published },
            })
            .collect();

        info!(query, results = results.len(), "search completed");
        results
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchResult>> {
        if let Some(cached) = self.cache.get(query) {
            debug!(query, "search cache hit");
            return Ok(cached);
        }

        let results = self.fetch(query, count).await;
        self.cache.put(query, results.clone());
        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    count: usize,
    summary: bool,
    freshness: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(rename = "webPages", default)]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    summary: String,
    #[serde(rename = "siteName", default)]
    site_name: String,
    #[serde(rename = "datePublished", default)]
    date_published: String,
    #[serde(rename = "dateLastCrawled", default)]
    date_last_crawled: String,
}
