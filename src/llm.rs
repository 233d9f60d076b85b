use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OpenAiConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

/// The completion API as the bot consumes it. Object safe so handlers can
/// be exercised in tests without a live network.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Sends `prompt` as a single system message to the chat-completions
    /// endpoint and returns the generated text.
    async fn chat(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Sends `prompt` to the legacy text-completions endpoint.
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    async fn post_json<T: Serialize>(&self, url: &str, request: &T) -> Result<reqwest::Response> {
        debug!("Sending request to OpenAI: {}", url);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, error_body);
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionApi for OpenAiClient {
    async fn chat(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: vec![ChatMessage {
                role: "system".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        let response: ChatResponse = self
            .post_json(&url, &request)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI chat response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("No choices in OpenAI chat response")
    }

    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let request = CompletionRequest {
            model: &self.config.completion_model,
            prompt,
            temperature,
            max_tokens,
        };

        let url = format!("{}/completions", self.config.base_url);
        let response: CompletionResponse = self
            .post_json(&url, &request)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .context("No choices in OpenAI completion response")
    }
}
