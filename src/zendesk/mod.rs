use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::Zendesk;
use crate::zendesk::model::IncrementalPage;

pub mod model;

/// Failure modes of a single incremental fetch. The sync engine retries
/// `Status` errors for 429 and 5xx responses; everything else is fatal.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Zendesk API error ({status}): {body}")]
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("Zendesk transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Status { status, .. } if *status == 429 || *status >= 500
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            FetchError::Transport(_) => None,
        }
    }
}

/// Incremental ticket feed consumed by the sync engine. Tests substitute a
/// recording mock for the HTTP client.
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// URL of the first page for a given watermark; subsequent pages come
    /// from the `next_page` field of each response.
    fn first_page_url(&self, start_time: i64) -> String;

    async fn fetch_page(&self, url: &str) -> Result<IncrementalPage, FetchError>;
}

#[derive(Clone)]
pub struct ZendeskClient {
    http: Client,
    base_url: Url,
    email: String,
    api_token: String,
}

impl fmt::Debug for ZendeskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZendeskClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ZendeskClient {
    pub fn from_config(cfg: &Zendesk) -> Result<Self> {
        let base_url = Url::parse(&format!("https://{}.zendesk.com/", cfg.subdomain))
            .context("invalid Zendesk subdomain")?;
        Ok(Self::with_base_url(
            cfg.email.clone(),
            cfg.api_token.clone(),
            base_url,
        ))
    }

    pub fn with_base_url(email: String, api_token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("support-hub/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            email,
            api_token,
        }
    }
}

#[async_trait]
impl TicketSource for ZendeskClient {
    fn first_page_url(&self, start_time: i64) -> String {
        format!(
            "{}api/v2/incremental/tickets.json?start_time={}",
            self.base_url, start_time
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<IncrementalPage, FetchError> {
        let res = self
            .http
            .get(url)
            // Token auth: "<email>/token" as the username, API token as password.
            .basic_auth(format!("{}/token", self.email), Some(&self.api_token))
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(
                res.headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            let body = res.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(%status, "rate limited by Zendesk");
            } else {
                warn!(%status, %body, "Zendesk API error");
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                retry_after,
                body,
            });
        }

        Ok(res.json::<IncrementalPage>().await?)
    }
}

/// Parse a `Retry-After` header given in whole seconds into a duration with
/// millisecond precision. Invalid or non-positive values are ignored.
pub fn parse_retry_after(header: Option<&str>) -> Option<Duration> {
    let seconds: f64 = header?.trim().parse().ok()?;
    if seconds.is_finite() && seconds > 0.0 {
        Some(Duration::from_millis((seconds * 1000.0).ceil() as u64))
    } else {
        None
    }
}

/// Derive the human-facing agent URL from the ticket's API self-link. Returns
/// `None` when the self-link is absent or unparsable.
pub fn build_ticket_url(api_url: Option<&str>, ticket_id: i64) -> Option<String> {
    let parsed = Url::parse(api_url?).ok()?;
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some(format!(
        "{}://{}/agent/tickets/{}",
        parsed.scheme(),
        authority,
        ticket_id
    ))
}
