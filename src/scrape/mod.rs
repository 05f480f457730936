// src/scrape/mod.rs

//! Page fetch + clean-text extraction with URL-keyed caching.
//!
//! The cleaner strips script/style/noscript subtrees and joins the visible
//! text nodes with single spaces, bounded to keep prompts lean. Thin pages
//! can be re-fetched through a headless-render sidecar for a small sampled
//! fraction of requests. Nothing in here raises; failure is an absent
//! snapshot.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::CacheLayer;
use crate::config::search::ScrapeConfig;

const CACHE_PREFIX: &str = "page";
const TITLE_MAX_CHARS: usize = 200;
/// Below this many bytes of raw HTML the page likely needs JS to render
const THIN_PAGE_BYTES: usize = 800;
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Cleaned page content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub text: String,
    pub fetched_at: String,
}

/// Page-reading capability (the orchestrator's seam for tests)
#[async_trait]
pub trait PageReader: Send + Sync {
    /// Fetch, clean, cache. Absent on any failure.
    async fn fetch_and_parse(&self, url: &str, ttl_secs: i64) -> Option<PageSnapshot>;
}

pub struct ScrapeService {
    client: Client,
    cache: Arc<CacheLayer>,
    config: ScrapeConfig,
}

impl ScrapeService {
    pub fn new(config: ScrapeConfig, cache: Arc<CacheLayer>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(BROWSER_UA)
            .build()?;
        Ok(Self {
            client,
            cache,
            config,
        })
    }

    async fn fetch_html(&self, url: &str) -> Option<String> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                debug!("Scrape of {} returned {}", url, response.status());
                None
            }
            Err(e) => {
                debug!("Scrape error for {}: {}", url, e);
                None
            }
        }
    }

    /// Re-fetch through the headless-render sidecar (POST {"url": ...})
    async fn render_with_js(&self, url: &str) -> Option<String> {
        if self.config.js_render_url.is_empty() {
            return None;
        }

        let response = self
            .client
            .post(&self.config.js_render_url)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    fn should_sample_js_render(&self) -> bool {
        self.config.js_render_enabled
            && rand::thread_rng().gen_range(1..=100) <= self.config.js_render_percent
    }
}

#[async_trait]
impl PageReader for ScrapeService {
    async fn fetch_and_parse(&self, url: &str, ttl_secs: i64) -> Option<PageSnapshot> {
        if url.is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get_json::<PageSnapshot>(CACHE_PREFIX, url).await {
            return Some(cached);
        }

        let mut html = self.fetch_html(url).await;

        let thin = html.as_ref().map(|h| h.len() < THIN_PAGE_BYTES).unwrap_or(true);
        if thin && self.should_sample_js_render() {
            if let Some(rendered) = self.render_with_js(url).await {
                debug!("JS render succeeded for {}", url);
                html = Some(rendered);
            }
        }

        let html = html?;
        let (title, text) = clean_html(&html, self.config.max_text_bytes);
        if text.is_empty() {
            return None;
        }

        let snapshot = PageSnapshot {
            url: url.to_string(),
            title,
            text,
            fetched_at: Utc::now().to_rfc3339(),
        };

        self.cache
            .set_json(CACHE_PREFIX, url, &snapshot, ttl_secs)
            .await;
        Some(snapshot)
    }
}

/// Strip boilerplate and return (title, visible text). Sync on purpose: the
/// parsed DOM is not Send and must never be held across an await.
fn clean_html(html: &str, max_text_bytes: usize) -> (String, String) {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("static selector");
    let title: String = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>())
        .unwrap_or_default();
    let title: String = title.trim().chars().take(TITLE_MAX_CHARS).collect();

    let mut text = String::new();
    collect_visible_text(document.root_element(), &mut text, max_text_bytes);

    (title, text.trim().to_string())
}

fn collect_visible_text(element: ElementRef, out: &mut String, max_bytes: usize) {
    if out.len() >= max_bytes {
        return;
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let tag = child_element.value().name();
            if matches!(tag, "script" | "style" | "noscript" | "head") {
                continue;
            }
            collect_visible_text(child_element, out, max_bytes);
        } else if let Some(text_node) = child.value().as_text() {
            let trimmed = text_node.trim();
            if trimmed.is_empty() {
                continue;
            }
            for ch in trimmed.chars() {
                if out.len() + ch.len_utf8() > max_bytes {
                    return;
                }
                out.push(ch);
            }
            if out.len() < max_bytes {
                out.push(' ');
            }
        }
        if out.len() >= max_bytes {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_html_strips_boilerplate() {
        let html = r#"
            <html>
              <head><title>  A Story About Cricket  </title><style>.x{}</style></head>
              <body>
                <script>var tracking = true;</script>
                <h1>Match preview</h1>
                <noscript>enable js</noscript>
                <p>India face Australia tomorrow.</p>
              </body>
            </html>
        "#;

        let (title, text) = clean_html(html, 20_000);
        assert_eq!(title, "A Story About Cricket");
        assert!(text.contains("Match preview"));
        assert!(text.contains("India face Australia tomorrow."));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("enable js"));
        assert!(!text.contains(".x{}"));
    }

    #[test]
    fn test_clean_html_bounds_text_size() {
        let body: String = "word ".repeat(10_000);
        let html = format!("<html><head><title>t</title></head><body><p>{}</p></body></html>", body);

        let (_, text) = clean_html(&html, 1000);
        assert!(text.len() <= 1000);
        assert!(!text.is_empty());
    }

    #[test]
    fn test_title_truncated_to_200_chars() {
        let long_title = "t".repeat(500);
        let html = format!("<html><head><title>{}</title></head><body>x</body></html>", long_title);

        let (title, _) = clean_html(&html, 1000);
        assert_eq!(title.chars().count(), 200);
    }

    #[tokio::test]
    async fn test_empty_url_is_absent() {
        let service = ScrapeService::new(
            crate::config::search::ScrapeConfig {
                timeout_secs: 1,
                cache_ttl_secs: 60,
                max_text_bytes: 1000,
                js_render_enabled: false,
                js_render_percent: 0,
                js_render_url: String::new(),
            },
            Arc::new(CacheLayer::in_process()),
        )
        .unwrap();

        assert!(service.fetch_and_parse("", 60).await.is_none());
    }
}
