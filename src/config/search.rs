// src/config/search.rs
// Web search and scrape configuration

use serde::{Deserialize, Serialize};

/// Search provider configuration
///
/// The primary provider is Serper-shaped JSON; when no API key is configured
/// every search goes straight to the free fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_key: String,
    pub api_url: String,
    pub timeout_secs: u64,
    pub cache_ttl_secs: i64,
    /// Hosts filtered out of results (search engines returning search pages)
    pub blocked_hosts: Vec<String>,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: super::helpers::env_or("SEARCH_API_KEY", ""),
            api_url: super::helpers::env_or("SEARCH_API_URL", "https://google.serper.dev/search"),
            timeout_secs: super::helpers::env_parsed("SEARCH_TIMEOUT", 5),
            cache_ttl_secs: super::helpers::env_parsed("WEB_SEARCH_CACHE_TTL", 3600),
            blocked_hosts: super::helpers::env_list(
                "SEARCH_BLOCKED_HOSTS",
                &["google.", "duckduckgo", "bing.", "serper", "search.brave"],
            ),
        }
    }
}

/// Page scrape configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub timeout_secs: u64,
    pub cache_ttl_secs: i64,
    /// Cleaned text cap in bytes
    pub max_text_bytes: usize,
    pub js_render_enabled: bool,
    /// Percentage of thin pages re-fetched through the headless renderer
    pub js_render_percent: u32,
    pub js_render_url: String,
}

impl ScrapeConfig {
    pub fn from_env() -> Self {
        Self {
            timeout_secs: super::helpers::env_parsed("SCRAPE_TIMEOUT", 12),
            cache_ttl_secs: super::helpers::env_parsed("SCRAPE_CACHE_TTL", 21600),
            max_text_bytes: super::helpers::env_parsed("SCRAPE_MAX_TEXT_BYTES", 20_000),
            js_render_enabled: super::helpers::env_bool("JS_RENDER_ENABLED", false),
            js_render_percent: super::helpers::env_parsed("JS_RENDER_PERCENT", 10),
            js_render_url: super::helpers::env_or("JS_RENDER_URL", ""),
        }
    }
}
