// =============================================================================
// Chat Model — LLM collaborator behind the advisor
// =============================================================================

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Text-generation collaborator. The orchestrator supplies one system
/// preamble and one structured user message and expects raw reply text back;
/// parsing happens upstream.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenRouter client
// ---------------------------------------------------------------------------

/// Chat-completions client for the OpenRouter API.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Build from `OPENROUTER_API_KEY`. The per-request timeout is set on
    /// the underlying HTTP client.
    pub fn from_env(model: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY missing (set env var)")?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("OPENROUTER_API_KEY empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client for OpenRouterClient")?;
        Ok(Self {
            http,
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let req = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        let resp = self
            .http
            .post("https://openrouter.ai/api/v1/chat/completions")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&req)
            .send()
            .await
            .context("openrouter request")?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = body.chars().take(800).collect();
            return Err(anyhow!("openrouter {}: {}", status.as_u16(), snippet));
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).context("openrouter json parse")?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .unwrap_or_default();

        debug!(
            model = %self.model,
            reply_chars = content.len(),
            "chat completion received"
        );
        Ok(content)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageOut {
    content: String,
}
