//! Flattens digests and ticket summaries into plain text and posts them to
//! the configured webhook.

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::info;

use crate::db::{self, Pool};
use crate::slack::WebhookService;

/// What to send: a stored digest, a ticket plus its summary, or raw text.
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    Digest { digest_id: String },
    TicketSummary { ticket_id: i64 },
    PlainText { text: String },
}

#[derive(Debug, Serialize)]
pub struct NotifyReceipt {
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<i64>,
}

pub async fn send_notification(
    pool: &Pool,
    webhook: &dyn WebhookService,
    target: NotifyTarget,
) -> Result<NotifyReceipt> {
    match target {
        NotifyTarget::Digest { digest_id } => {
            let digest = db::get_digest(pool, &digest_id)
                .await?
                .ok_or_else(|| anyhow!("Digest {digest_id} not found."))?;
            let text = format!(
                "*{}*\nCreated: {}\n\n{}",
                digest.title,
                digest.created_at.to_rfc3339(),
                digest.content_markdown
            );
            webhook.post_text(&text).await?;
            info!(digest_id = %digest_id, "digest posted to webhook");
            Ok(NotifyReceipt {
                ok: true,
                kind: "digest",
                digest_id: Some(digest_id),
                ticket_id: None,
            })
        }
        NotifyTarget::TicketSummary { ticket_id } => {
            let ticket = db::get_ticket(pool, ticket_id)
                .await?
                .ok_or_else(|| anyhow!("Ticket {ticket_id} not found."))?;
            let summary = db::get_summary(pool, ticket_id).await?;

            let summary_text = summary
                .as_ref()
                .map(|s| s.summary_text.clone())
                .filter(|s| !s.is_empty())
                .or_else(|| ticket.summary_text.clone().filter(|s| !s.is_empty()))
                .unwrap_or_else(|| "Summary not available yet.".to_string());
            let key_actions = summary
                .as_ref()
                .map(|s| s.key_actions.clone())
                .unwrap_or_default();
            let next_steps = summary
                .as_ref()
                .map(|s| s.next_steps.clone())
                .unwrap_or_default();

            let mut parts: Vec<String> = vec![
                format!("*Ticket #{}*", ticket.ticket_id),
                format!("Brand: {}", ticket.brand.as_str()),
                format!("Status: {}", ticket.status),
                format!("Subject: {}", ticket.subject),
            ];
            if let Some(url) = &ticket.ticket_url {
                parts.push(format!("URL: {url}"));
            }
            parts.push(String::new());
            parts.push(format!("Summary: {summary_text}"));
            if !key_actions.is_empty() {
                parts.push(format!("Key Actions:\n- {}", key_actions.join("\n- ")));
            }
            if !next_steps.is_empty() {
                parts.push(format!("Next Steps:\n- {}", next_steps.join("\n- ")));
            }

            webhook.post_text(&parts.join("\n")).await?;
            info!(ticket_id, "ticket summary posted to webhook");
            Ok(NotifyReceipt {
                ok: true,
                kind: "ticket_summary",
                digest_id: None,
                ticket_id: Some(ticket_id),
            })
        }
        NotifyTarget::PlainText { text } => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(anyhow!("Cannot send an empty message."));
            }
            webhook.post_text(trimmed).await?;
            Ok(NotifyReceipt {
                ok: true,
                kind: "plain_text",
                digest_id: None,
                ticket_id: None,
            })
        }
    }
}
