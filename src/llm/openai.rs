// src/llm/openai.rs
// Chat-completions provider for OpenAI-compatible endpoints

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{estimate_tokens, GenerationParams, LlmProvider, LlmResponse, Message};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Chat provider speaking the OpenAI chat-completions shape
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, model: String, timeout_secs: u64) -> Result<Self> {
        if api_key.is_empty() {
            return Err(anyhow!("LLM API key is required"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model,
        })
    }

    async fn send_request(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        debug!(
            "Sending request to {} with {} messages",
            self.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API returned {}: {}", status, error_text));
        }

        let body: ChatCompletionResponse = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        system_prompt: &str,
        params: GenerationParams,
    ) -> Result<LlmResponse> {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            wire_messages.push(WireMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        for message in &messages {
            wire_messages.push(WireMessage {
                role: message.role.clone(),
                content: message.content.clone(),
            });
        }

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: wire_messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        // One retry on transient failure before surfacing the error
        let response = match self.send_request(&request).await {
            Ok(response) => response,
            Err(first) => {
                warn!("LLM call failed, retrying once: {}", first);
                self.send_request(&request).await?
            }
        };

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in LLM response"))?;

        // Estimate usage when the provider doesn't report it
        let (prompt_tokens, completion_tokens) = match response.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => {
                let prompt_estimate: i64 = messages
                    .iter()
                    .map(|m| estimate_tokens(&m.content))
                    .sum::<i64>()
                    + estimate_tokens(system_prompt);
                (prompt_estimate, estimate_tokens(&text))
            }
        };

        debug!(
            "LLM response: {} prompt tokens, {} completion tokens",
            prompt_tokens, completion_tokens
        );

        Ok(LlmResponse {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }
}
