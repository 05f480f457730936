// src/chat/evidence.rs

//! Web-evidence pipeline: prediction cache first, then search + scrape.
//!
//! One search per freshness window (6h sports, 24h general). Sports turns
//! consult the shared prediction cache before any provider call and write
//! their bundle back on a miss, so one fetch serves every user asking about
//! the same match.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::chat::PredictionConfig;
use crate::predictions::{PredictionKey, PredictionStore};
use crate::scrape::PageReader;
use crate::search::{SearchService, SourceRef};
use crate::sports;

const SCRAPE_TOP_N: usize = 5;
const SEARCH_FETCH_LIMIT: usize = 8;
const SNIPPET_CHARS: usize = 600;

/// Evidence gathered for one turn
#[derive(Debug, Clone, Default)]
pub struct WebEvidence {
    pub context: String,
    pub sources: Vec<SourceRef>,
    /// A real (non-cached) provider call happened; counts against the
    /// web-search sub-quota
    pub fresh_provider_call: bool,
}

impl WebEvidence {
    pub fn is_empty(&self) -> bool {
        self.context.trim().is_empty()
    }
}

pub struct EvidencePipeline {
    search: Arc<SearchService>,
    scrape: Arc<dyn PageReader>,
    predictions: Arc<dyn PredictionStore>,
    config: PredictionConfig,
}

impl EvidencePipeline {
    pub fn new(
        search: Arc<SearchService>,
        scrape: Arc<dyn PageReader>,
        predictions: Arc<dyn PredictionStore>,
        config: PredictionConfig,
    ) -> Self {
        Self {
            search,
            scrape,
            predictions,
            config,
        }
    }

    fn refined_query(message: &str, sports_mode: bool) -> String {
        let base = if sports_mode {
            sports::enhance_sports_query(message)
        } else {
            message.to_string()
        };
        sports::refine_search_query(&base, sports_mode)
    }

    /// Whether a cached result set already covers this turn (cached reads
    /// don't consume the sub-quota)
    pub async fn has_cached(&self, message: &str, sports_mode: bool) -> bool {
        if sports_mode {
            if let Some(details) = sports::extract_match_details(message) {
                let key = PredictionKey::new(
                    sports::detect_sport(message),
                    sports::detect_query_type(message),
                    &details,
                );
                // Existence only; the view counter moves on the real read
                if let Ok(true) = self.predictions.peek(&key).await {
                    return true;
                }
            }
        }
        self.search
            .has_cached(&Self::refined_query(message, sports_mode))
            .await
    }

    /// Gather evidence for the turn. Failures and empty providers yield an
    /// empty contribution, never an error.
    pub async fn gather(&self, message: &str, sports_mode: bool) -> WebEvidence {
        let freshness_hours = if sports_mode {
            self.config.sports_ttl_hours
        } else {
            self.config.general_ttl_hours
        };
        let ttl_secs = freshness_hours * 3600;

        let match_details = if sports_mode {
            sports::extract_match_details(message)
        } else {
            None
        };

        // 1) Shared prediction cache: serves everyone, no search spent
        if let Some(details) = &match_details {
            let key = PredictionKey::new(
                sports::detect_sport(message),
                sports::detect_query_type(message),
                details,
            );
            match self.predictions.get(&key).await {
                Ok(Some(bundle)) => {
                    debug!(
                        "Prediction cache hit for '{}' (views: {})",
                        details, bundle.view_count
                    );
                    return WebEvidence {
                        context: bundle.analysis,
                        sources: bundle.sources,
                        fresh_provider_call: false,
                    };
                }
                Ok(None) => {}
                Err(e) => warn!("Prediction cache lookup failed: {}", e),
            }
        }

        // 2) One web search per freshness window
        let query = Self::refined_query(message, sports_mode);
        let outcome = self.search.search(&query, SEARCH_FETCH_LIMIT).await;
        if outcome.results.is_empty() {
            debug!("No search results for '{}'", query);
            return WebEvidence::default();
        }
        let fresh_provider_call = !outcome.from_cache;

        // 3) Scrape and condense the top results (each cached per URL)
        let results: Vec<_> = outcome.results.iter().take(SCRAPE_TOP_N).collect();
        let mut snippets = Vec::new();
        let mut sources = Vec::new();
        let mut index = 1u32;

        for result in &results {
            if self.search.is_engine_host(&result.url) {
                continue;
            }

            let page = self.scrape.fetch_and_parse(&result.url, ttl_secs).await;
            let title = page
                .as_ref()
                .map(|p| p.title.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| {
                    if result.title.is_empty() {
                        "Untitled".to_string()
                    } else {
                        result.title.clone()
                    }
                });
            let text = page
                .as_ref()
                .map(|p| p.text.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| result.snippet.clone());
            let snippet: String = text.chars().take(SNIPPET_CHARS).collect();
            if snippet.is_empty() {
                continue;
            }

            snippets.push(format!("[{}] {}\n{}\nSource: {}", index, title, snippet, result.url));
            sources.push(SourceRef {
                number: index,
                title,
                url: result.url.clone(),
                source: if result.source.is_empty() {
                    crate::search::host_of(&result.url)
                } else {
                    result.source.clone()
                },
                fetched_at: page
                    .map(|p| p.fetched_at)
                    .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            });
            index += 1;
        }

        let context = if snippets.is_empty() {
            SearchService::format_results_for_context(&outcome.results)
        } else {
            format!("Web Evidence (fresh):\n\n{}", snippets.join("\n\n"))
        };
        let sources = if sources.is_empty() {
            SearchService::extract_citations(&outcome.results)
        } else {
            sources
        };

        // 4) Write the sports bundle back for everyone else
        if let Some(details) = &match_details {
            let key = PredictionKey::new(
                sports::detect_sport(message),
                sports::detect_query_type(message),
                details,
            );
            if let Err(e) = self
                .predictions
                .put(&key, &context, &sources, freshness_hours)
                .await
            {
                warn!("Prediction cache write failed: {}", e);
            }
        }

        WebEvidence {
            context,
            sources,
            fresh_provider_call,
        }
    }
}
