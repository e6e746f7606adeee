//! Per-ticket AI summaries with cache-or-refresh semantics.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::db::{self, Pool, SummaryRow, TicketRow};
use crate::openai::CompletionService;

/// Upper bound on the action/step lists kept from a model response.
const MAX_LIST_ITEMS: usize = 6;

const SYSTEM_PROMPT: &str =
    "You are a senior support lead. Produce concise operational summaries in strict JSON.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryPayload {
    pub summary: String,
    pub key_actions: Vec<String>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SummarizeResponse {
    pub ok: bool,
    pub cached: bool,
    pub ticket_id: i64,
    pub summary_text: String,
    pub key_actions: Vec<String>,
    pub next_steps: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn sanitize_string_array(value: Option<&serde_json::Value>) -> Vec<String> {
    let Some(serde_json::Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .take(MAX_LIST_ITEMS)
        .map(str::to_string)
        .collect()
}

/// Parse the model output. Strict JSON is expected; anything else degrades to
/// a line split (line 1 summary, lines 2-4 key actions, lines 5-7 next steps)
/// rather than failing the request.
pub fn parse_summary(raw: &str) -> SummaryPayload {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(raw) {
        if parsed.is_object() {
            let summary = parsed
                .get("summary")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("No summary generated.")
                .to_string();
            return SummaryPayload {
                summary,
                key_actions: sanitize_string_array(parsed.get("key_actions")),
                next_steps: sanitize_string_array(parsed.get("next_steps")),
            };
        }
    }

    let lines: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    SummaryPayload {
        summary: lines
            .first()
            .cloned()
            .unwrap_or_else(|| "No summary generated.".to_string()),
        key_actions: lines.iter().skip(1).take(3).cloned().collect(),
        next_steps: lines.iter().skip(4).take(3).cloned().collect(),
    }
}

/// Compact projection of the ticket embedded in the prompt. The raw payload
/// rides along so the model sees fields the cache does not type.
fn build_prompt(ticket: &TicketRow) -> String {
    let prompt = json!({
        "task": "Create an action-oriented support summary for the ticket.",
        "output_format": {
            "summary": "one concise paragraph",
            "key_actions": ["array of 2-5 imperative bullet items"],
            "next_steps": ["array of 2-5 practical next steps"],
        },
        "constraints": [
            "Reference ticket status and requester intent",
            "Prioritize actions that unblock support execution",
            "Do not include markdown code fences",
            "Return JSON only",
        ],
        "ticket": {
            "ticket_id": ticket.ticket_id,
            "brand": ticket.brand.as_str(),
            "status": ticket.status,
            "priority": ticket.priority,
            "subject": ticket.subject,
            "requester_email": ticket.requester_email,
            "requester_name": ticket.requester_name,
            "assignee_email": ticket.assignee_email,
            "zendesk_updated_at": ticket.zendesk_updated_at,
            "raw_payload": ticket.raw_payload,
        },
    });
    prompt.to_string()
}

/// Summarize one cached ticket. With `refresh=false` a stored summary with
/// non-empty text is returned as-is; otherwise the completion API is called
/// once (no retries at this layer) and the result is upserted and mirrored
/// into the ticket cache.
pub async fn summarize_ticket(
    pool: &Pool,
    completions: &dyn CompletionService,
    ticket_id: i64,
    refresh: bool,
) -> Result<SummarizeResponse> {
    let ticket = db::get_ticket(pool, ticket_id)
        .await?
        .ok_or_else(|| anyhow!("Ticket {ticket_id} not found in ticket cache."))?;

    if !refresh {
        if let Some(cached) = db::get_summary(pool, ticket_id).await? {
            if !cached.summary_text.trim().is_empty() {
                return Ok(SummarizeResponse {
                    ok: true,
                    cached: true,
                    ticket_id,
                    summary_text: cached.summary_text,
                    key_actions: cached.key_actions,
                    next_steps: cached.next_steps,
                    updated_at: cached.updated_at,
                    model: None,
                });
            }
        }
    }

    let content = completions
        .complete(SYSTEM_PROMPT, &build_prompt(&ticket))
        .await?;
    let generated = parse_summary(&content);
    let now = Utc::now();
    let model = completions.model().to_string();

    db::upsert_summary(
        pool,
        &SummaryRow {
            ticket_id,
            summary_text: generated.summary.clone(),
            key_actions: generated.key_actions.clone(),
            next_steps: generated.next_steps.clone(),
            model: model.clone(),
            updated_at: now,
        },
    )
    .await?;
    db::set_ticket_summary(pool, ticket_id, &generated.summary, now).await?;

    info!(ticket_id, model = %model, "ticket summary generated");
    Ok(SummarizeResponse {
        ok: true,
        cached: false,
        ticket_id,
        summary_text: generated.summary,
        key_actions: generated.key_actions,
        next_steps: generated.next_steps,
        updated_at: now,
        model: Some(model),
    })
}
