// src/llm/embeddings.rs
// Embedding client: encode text into fixed-dimension vectors

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Encoder contract: one fixed dimension per deployment, cosine similarity
/// everywhere downstream. Empty or whitespace-only input encodes to `None`.
#[async_trait]
pub trait Embeddings: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Batch variant; output order matches input order
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

/// HTTP embeddings client (OpenAI-compatible `/embeddings` endpoint)
pub struct HttpEmbeddings {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddings {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        dimension: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            dimension,
        })
    }

    async fn request(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": inputs,
            "dimensions": self.dimension,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embedding API returned {}: {}", status, error_text));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        // The API is index-annotated; sort to preserve input order
        parsed.data.sort_by_key(|d| d.index);

        for datum in &parsed.data {
            if datum.embedding.len() != self.dimension {
                return Err(anyhow!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    datum.embedding.len()
                ));
            }
        }

        debug!("Generated {} embeddings", parsed.data.len());
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embeddings for HttpEmbeddings {
    async fn encode(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let mut vectors = self.request(vec![text]).await?;
        Ok(vectors.pop())
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        // Blank inputs stay home; everything else ships in one call, and the
        // results are folded back into the original positions.
        let non_empty: Vec<(usize, &str)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.as_str()))
            .collect();

        let mut output: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        if non_empty.is_empty() {
            return Ok(output);
        }

        let vectors = self
            .request(non_empty.iter().map(|(_, t)| *t).collect())
            .await?;

        for ((position, _), vector) in non_empty.into_iter().zip(vectors) {
            output[position] = Some(vector);
        }
        Ok(output)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let v = vec![0.5, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
