use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fmt;

use crate::config::Slack;

/// Outbound notification sink. Production posts to a Slack incoming webhook;
/// tests record the messages instead.
#[async_trait]
pub trait WebhookService: Send + Sync {
    async fn post_text(&self, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SlackWebhook {
    http: Client,
    webhook_url: String,
}

impl fmt::Debug for SlackWebhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackWebhook").finish_non_exhaustive()
    }
}

impl SlackWebhook {
    pub fn from_config(cfg: &Slack) -> Self {
        Self::new(cfg.webhook_url.clone())
    }

    pub fn new(webhook_url: String) -> Self {
        let http = Client::builder()
            .user_agent("support-hub/0.1")
            .build()
            .expect("reqwest client");
        Self { http, webhook_url }
    }
}

#[async_trait]
impl WebhookService for SlackWebhook {
    async fn post_text(&self, text: &str) -> Result<()> {
        let res = self
            .http
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("failed to reach Slack webhook")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Slack webhook failed ({status}): {body}"));
        }
        Ok(())
    }
}
