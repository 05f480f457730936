// src/search/duckduckgo.rs
// Free fallback search: DuckDuckGo HTML endpoint, no API key needed

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;

use super::{host_of, SearchBackend, SearchHit};

const ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

pub struct DuckDuckGoBackend {
    client: Client,
}

impl DuckDuckGoBackend {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(BROWSER_UA)
            .build()?;
        Ok(Self { client })
    }

    /// Result anchors use redirect links like `/l/?uddg=<encoded url>`;
    /// unwrap them to the destination article.
    fn resolve_redirect(href: &str) -> Option<String> {
        if href.contains("uddg=") {
            let absolute = if href.starts_with("//") {
                format!("https:{}", href)
            } else if href.starts_with('/') {
                format!("https://duckduckgo.com{}", href)
            } else {
                href.to_string()
            };
            let parsed = url::Url::parse(&absolute).ok()?;
            let (_, target) = parsed.query_pairs().find(|(k, _)| k == "uddg")?;
            return Some(target.into_owned());
        }
        if href.starts_with("http") {
            return Some(href.to_string());
        }
        None
    }

    /// Parse the results page in one sync pass (the DOM never crosses an await)
    fn parse_results(html: &str, limit: usize) -> Vec<SearchHit> {
        let document = Html::parse_document(html);
        let anchor_selector = Selector::parse("a.result__a").expect("static selector");

        let mut results = Vec::new();
        for anchor in document.select(&anchor_selector) {
            let href = match anchor.value().attr("href") {
                Some(href) => href,
                None => continue,
            };
            let url = match Self::resolve_redirect(href) {
                Some(url) => url,
                None => continue,
            };

            let host = host_of(&url);
            // The engine's own hosts only lead back to more search pages
            if host.is_empty()
                || ["duckduckgo.com", "google.", "bing.", "yahoo."]
                    .iter()
                    .any(|engine| host.contains(engine))
            {
                continue;
            }

            let title = anchor.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                continue;
            }

            results.push(SearchHit {
                snippet: title.clone(),
                title,
                url,
                source: host,
            });
            if results.len() >= limit {
                break;
            }
        }
        results
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("q", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("DuckDuckGo returned {}", status));
        }

        let html = response.text().await?;
        let results = Self::parse_results(&html, limit);
        debug!("DuckDuckGo returned {} results", results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_uddg_redirect() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.espncricinfo.com%2Fstory%2F1&rut=abc";
        assert_eq!(
            DuckDuckGoBackend::resolve_redirect(href),
            Some("https://www.espncricinfo.com/story/1".to_string())
        );
    }

    #[test]
    fn test_passes_through_absolute_urls() {
        assert_eq!(
            DuckDuckGoBackend::resolve_redirect("https://example.com/a"),
            Some("https://example.com/a".to_string())
        );
        assert_eq!(DuckDuckGoBackend::resolve_redirect("javascript:void(0)"), None);
    }

    #[test]
    fn test_parses_result_anchors() {
        let html = r#"
            <html><body>
              <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fnews.example%2Fstory">Big story</a>
              <a class="result__a" href="https://duckduckgo.com/?q=loop">Self link</a>
              <a class="result__a" href="https://other.example/page">Other page</a>
            </body></html>
        "#;

        let results = DuckDuckGoBackend::parse_results(html, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://news.example/story");
        assert_eq!(results[0].title, "Big story");
        assert_eq!(results[1].source, "other.example");
    }
}
