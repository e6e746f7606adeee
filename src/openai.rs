use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::fmt;

use crate::config::OpenAi;

const OPENAI_API_BASE: &str = "https://api.openai.com/";

/// Chat-completion backend used by the summarizer. Tests substitute a canned
/// implementation; production uses `OpenAiClient`.
#[async_trait]
pub trait CompletionService: Send + Sync {
    fn model(&self) -> &str;

    /// Send one system + user message pair and return the first choice's
    /// message content. Errors on any non-2xx response or empty content.
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn from_config(cfg: &OpenAi) -> Self {
        let base_url = Url::parse(OPENAI_API_BASE).expect("valid default OpenAI URL");
        Self::with_base_url(cfg.api_key.clone(), cfg.model.clone(), base_url)
    }

    pub fn with_base_url(api_key: String, model: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("support-hub/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionService for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let endpoint = self
            .base_url
            .join("v1/chat/completions")
            .context("invalid OpenAI base URL")?;
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
        });

        let res = self
            .http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach completion API")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow!("completion request failed ({status}): {text}"));
        }

        let payload: ChatCompletionResponse = res
            .json()
            .await
            .context("invalid completion response JSON")?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty());

        content.ok_or_else(|| anyhow!("completion API returned an empty response"))
    }
}
