// src/search/mod.rs

//! Web search with query-level caching.
//!
//! Attempt order: cache hit, paid provider (Serper-shaped JSON, short
//! timeout), free fallback, empty. Successful result lists are cached under
//! the normalized query so one provider call serves every identical query
//! inside the TTL window. Results whose host is itself a search engine are
//! filtered out.

pub mod duckduckgo;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::config::search::SearchConfig;

pub use duckduckgo::DuckDuckGoBackend;

const CACHE_PREFIX: &str = "search";

/// One search result row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

/// Search outcome with provenance
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub provider: String,
    pub from_cache: bool,
}

/// A numbered citation attached to the final response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub number: u32,
    pub title: String,
    pub url: String,
    pub source: String,
    pub fetched_at: String,
}

/// Upstream search adapter
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Serper-shaped paid provider: request `{q, num}`, response `organic` list
pub struct SerperBackend {
    client: Client,
    api_key: String,
    api_url: String,
}

impl SerperBackend {
    pub fn new(api_key: String, api_url: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Debug, Deserialize)]
struct SerperOrganic {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
    source: Option<String>,
}

#[async_trait]
impl SearchBackend for SerperBackend {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let body = json!({ "q": query, "num": limit });

        let response = self
            .client
            .post(&self.api_url)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Search API returned {}", status));
        }

        let parsed: SerperResponse = response.json().await?;
        let results = parsed
            .organic
            .into_iter()
            .take(limit)
            .filter_map(|r| {
                let url = r.link?;
                Some(SearchHit {
                    title: r.title.unwrap_or_else(|| "Untitled".to_string()),
                    source: r.source.unwrap_or_else(|| host_of(&url)),
                    snippet: r.snippet.unwrap_or_default(),
                    url,
                })
            })
            .collect();
        Ok(results)
    }
}

/// Cache-fronted multi-provider search
pub struct SearchService {
    primary: Option<Arc<dyn SearchBackend>>,
    fallback: Option<Arc<dyn SearchBackend>>,
    cache: Arc<CacheLayer>,
    cache_ttl_secs: i64,
    timeout: Duration,
    blocked_hosts: Vec<String>,
}

impl SearchService {
    pub fn new(config: &SearchConfig, cache: Arc<CacheLayer>) -> Self {
        let primary: Option<Arc<dyn SearchBackend>> = if config.api_key.is_empty() {
            None
        } else {
            match SerperBackend::new(
                config.api_key.clone(),
                config.api_url.clone(),
                config.timeout_secs,
            ) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!("Could not construct search provider: {}", e);
                    None
                }
            }
        };

        let fallback: Option<Arc<dyn SearchBackend>> =
            match DuckDuckGoBackend::new(config.timeout_secs.max(8)) {
                Ok(backend) => Some(Arc::new(backend)),
                Err(e) => {
                    warn!("Could not construct fallback search: {}", e);
                    None
                }
            };

        Self {
            primary,
            fallback,
            cache,
            cache_ttl_secs: config.cache_ttl_secs,
            timeout: Duration::from_secs(config.timeout_secs),
            blocked_hosts: config.blocked_hosts.clone(),
        }
    }

    /// Test/bespoke wiring with explicit backends
    pub fn with_backends(
        primary: Option<Arc<dyn SearchBackend>>,
        fallback: Option<Arc<dyn SearchBackend>>,
        cache: Arc<CacheLayer>,
        cache_ttl_secs: i64,
        blocked_hosts: Vec<String>,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache,
            cache_ttl_secs,
            timeout: Duration::from_secs(5),
            blocked_hosts,
        }
    }

    /// Search with cache-first semantics. Never fails: exhausting every
    /// provider yields an empty outcome.
    pub async fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        let key = normalize_query(query);

        if let Some(cached) = self.cache.get_json::<Vec<SearchHit>>(CACHE_PREFIX, &key).await {
            debug!("Search cache hit for '{}'", key);
            return SearchOutcome {
                results: cached,
                provider: "cache".to_string(),
                from_cache: true,
            };
        }

        for backend in [&self.primary, &self.fallback].into_iter().flatten() {
            match tokio::time::timeout(self.timeout, backend.search(query, limit)).await {
                Ok(Ok(results)) if !results.is_empty() => {
                    let filtered = self.filter_engine_hosts(results);
                    if filtered.is_empty() {
                        continue;
                    }
                    self.cache
                        .set_json(CACHE_PREFIX, &key, &filtered, self.cache_ttl_secs)
                        .await;
                    debug!(
                        "{} returned {} results for '{}'",
                        backend.name(),
                        filtered.len(),
                        key
                    );
                    return SearchOutcome {
                        results: filtered,
                        provider: backend.name().to_string(),
                        from_cache: false,
                    };
                }
                Ok(Ok(_)) => {
                    debug!("{} returned no results for '{}'", backend.name(), key);
                }
                Ok(Err(e)) => {
                    warn!("{} search failed: {}", backend.name(), e);
                }
                Err(_) => {
                    warn!(
                        "{} search timed out after {:?}",
                        backend.name(),
                        self.timeout
                    );
                }
            }
        }

        SearchOutcome {
            provider: "none".to_string(),
            ..Default::default()
        }
    }

    /// Whether a cached result set exists for the query (cached reads don't
    /// consume the web-search sub-quota)
    pub async fn has_cached(&self, query: &str) -> bool {
        self.cache
            .get_json::<Vec<SearchHit>>(CACHE_PREFIX, &normalize_query(query))
            .await
            .is_some()
    }

    /// Search-engine hosts returning search pages are recursive junk
    pub fn is_engine_host(&self, url: &str) -> bool {
        let host = host_of(url);
        if host.is_empty() {
            return true;
        }
        self.blocked_hosts.iter().any(|b| host.contains(b.as_str()))
    }

    fn filter_engine_hosts(&self, results: Vec<SearchHit>) -> Vec<SearchHit> {
        results
            .into_iter()
            .filter(|r| !self.is_engine_host(&r.url))
            .collect()
    }

    /// Attach monotonically increasing citation indices and fetch timestamps
    pub fn extract_citations(results: &[SearchHit]) -> Vec<SourceRef> {
        let fetched_at = Utc::now().to_rfc3339();
        results
            .iter()
            .enumerate()
            .map(|(i, r)| SourceRef {
                number: (i + 1) as u32,
                title: if r.title.is_empty() {
                    "Untitled".to_string()
                } else {
                    r.title.clone()
                },
                url: r.url.clone(),
                source: if r.source.is_empty() {
                    host_of(&r.url)
                } else {
                    r.source.clone()
                },
                fetched_at: fetched_at.clone(),
            })
            .collect()
    }

    /// Plain formatting of raw results when scraping produced nothing
    pub fn format_results_for_context(results: &[SearchHit]) -> String {
        if results.is_empty() {
            return String::new();
        }

        let mut context = String::from("WEB SEARCH RESULTS:\n\n");
        for (i, result) in results.iter().enumerate() {
            let snippet = result.snippet.replace('\n', " ");
            context.push_str(&format!(
                "[{}] {}\n   Source: {}\n   {}\n\n",
                i + 1,
                result.title,
                result.source,
                snippet.trim()
            ));
        }
        context
    }
}

pub(crate) fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_no_backends() -> SearchService {
        SearchService::with_backends(
            None,
            None,
            Arc::new(CacheLayer::in_process()),
            3600,
            vec![
                "google.".to_string(),
                "duckduckgo".to_string(),
                "bing.".to_string(),
            ],
        )
    }

    #[test]
    fn test_normalize_query_collapses_whitespace() {
        assert_eq!(normalize_query("  India   vs  Australia "), "india vs australia");
        assert_eq!(normalize_query("India vs Australia"), "india vs australia");
    }

    #[test]
    fn test_engine_host_filtering() {
        let service = service_with_no_backends();
        assert!(service.is_engine_host("https://www.google.com/search?q=x"));
        assert!(service.is_engine_host("https://duckduckgo.com/?q=x"));
        assert!(service.is_engine_host("not a url"));
        assert!(!service.is_engine_host("https://www.espncricinfo.com/story/1"));
    }

    #[test]
    fn test_extract_citations_numbers_monotonically() {
        let results = vec![
            SearchHit {
                title: "First".into(),
                url: "https://a.example/1".into(),
                snippet: "s1".into(),
                source: "a.example".into(),
            },
            SearchHit {
                title: String::new(),
                url: "https://b.example/2".into(),
                snippet: "s2".into(),
                source: String::new(),
            },
        ];

        let citations = SearchService::extract_citations(&results);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].number, 1);
        assert_eq!(citations[1].number, 2);
        assert_eq!(citations[1].title, "Untitled");
        assert_eq!(citations[1].source, "b.example");
    }

    #[tokio::test]
    async fn test_search_with_no_backends_is_empty_not_error() {
        let service = service_with_no_backends();
        let outcome = service.search("anything", 5).await;
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.provider, "none");
        assert!(!outcome.from_cache);
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        struct CountingBackend(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl SearchBackend for CountingBackend {
            fn name(&self) -> &'static str {
                "counting"
            }
            async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![SearchHit {
                    title: "T".into(),
                    url: "https://news.example/a".into(),
                    snippet: "s".into(),
                    source: "news.example".into(),
                }])
            }
        }

        let backend = Arc::new(CountingBackend(std::sync::atomic::AtomicUsize::new(0)));
        let service = SearchService::with_backends(
            Some(backend.clone()),
            None,
            Arc::new(CacheLayer::in_process()),
            3600,
            vec![],
        );

        let first = service.search("Latest News", 5).await;
        assert!(!first.from_cache);
        // Same query, different whitespace/case: still one provider call
        let second = service.search("  latest   news ", 5).await;
        assert!(second.from_cache);
        assert_eq!(backend.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
