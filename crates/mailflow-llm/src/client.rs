use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};

/// One message in a chat-completions request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat client for an OpenAI-compatible endpoint (SiliconFlow by default).
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    /// `base_url` without trailing slash, e.g. `https://api.siliconflow.cn/v1`.
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request, retrying transient failures.
    ///
    /// `retries` additional attempts after the first; `backoff` between
    /// attempts (the pipeline uses 2 retries / short backoff for drafting
    /// and 1 retry / 2 s for retrieval composition).
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        retries: u32,
        backoff: Duration,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.complete_once(messages, temperature).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "chat request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete_once(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });

        debug!(model = %self.model, "sending chat request");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        api_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("empty choices in chat response".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Embeddings client for the same endpoint family.
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embeddings API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let mut rows: Vec<(usize, Vec<f32>)> = api_resp
            .data
            .into_iter()
            .map(|d| (d.index, d.embedding))
            .collect();
        rows.sort_by_key(|(i, _)| *i);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut rows = self.embed(&[text.to_string()]).await?;
        rows.pop()
            .ok_or_else(|| LlmError::Parse("empty embeddings response".to_string()))
    }

    /// Detect the model's dimensionality by embedding a probe string.
    pub async fn probe_dimension(&self) -> Result<usize> {
        Ok(self.embed_query("test").await?.len())
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedRow>,
}

#[derive(Debug, Deserialize)]
struct EmbedRow {
    index: usize,
    embedding: Vec<f32>,
}
