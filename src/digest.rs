//! Digest builder: renders a snapshot of selected tickets into a shareable
//! markdown + table artifact and persists it with per-ticket linkage rows.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DigestRow, Pool, TicketRow};
use crate::model::{DigestFilters, DigestSource};

/// Bullet-list preview size in the rendered markdown.
const ACTION_QUEUE_LIMIT: usize = 30;
/// Markdown table preview size. The stored `content_table` always carries the
/// full selection.
const TABLE_LIMIT: usize = 50;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct DigestCreated {
    pub ok: bool,
    pub digest: DigestRow,
    pub ticket_count: usize,
}

/// Coerce a JSON id list into unique i64 ticket ids, preserving first-seen
/// order. Non-numeric entries are discarded.
pub fn normalize_ticket_ids(values: &[Value]) -> Vec<i64> {
    let mut seen = Vec::new();
    for value in values {
        let id = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if let Some(id) = id {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn safe_iso(value: Option<&str>) -> String {
    match value {
        None => "n/a".to_string(),
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(parsed) => parsed
                .with_timezone(&Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            Err(_) => raw.to_string(),
        },
    }
}

fn requester_label(ticket: &TicketRow) -> String {
    ticket
        .requester_name
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| ticket.requester_email.clone().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Render the markdown artifact: header, filter echo, status/brand breakdowns,
/// action queue preview and a ticket table with pipe-escaped subjects.
pub fn render_digest_markdown(
    title: &str,
    tickets: &[TicketRow],
    filters: &DigestFilters,
    generated_at: DateTime<Utc>,
) -> String {
    let mut status_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut brand_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for ticket in tickets {
        *status_counts.entry(ticket.status.as_str()).or_default() += 1;
        *brand_counts.entry(ticket.brand.as_str()).or_default() += 1;
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# {title}"));
    lines.push(String::new());
    lines.push(format!(
        "Generated: {}",
        generated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    ));
    lines.push(format!("Tickets: {}", tickets.len()));
    lines.push(String::new());
    lines.push("## Filters".to_string());
    lines.push(format!("- Brand: {}", filters.brand.as_deref().unwrap_or("all")));
    lines.push(format!("- Status: {}", filters.status.as_deref().unwrap_or("all")));
    lines.push(format!("- Search: {}", filters.search.as_deref().unwrap_or("none")));
    lines.push(String::new());
    lines.push("## By Status".to_string());
    for (status, count) in &status_counts {
        lines.push(format!("- {status}: {count}"));
    }
    lines.push(String::new());
    lines.push("## By Brand".to_string());
    for (brand, count) in &brand_counts {
        lines.push(format!("- {brand}: {count}"));
    }
    lines.push(String::new());
    lines.push("## Action Queue".to_string());
    for ticket in tickets.iter().take(ACTION_QUEUE_LIMIT) {
        let summary = ticket
            .summary_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ticket.subject.as_str());
        lines.push(format!(
            "- #{} [{}/{}] {}",
            ticket.ticket_id,
            ticket.brand.as_str(),
            ticket.status,
            summary
        ));
    }
    lines.push(String::new());
    lines.push("## Ticket Table".to_string());
    lines.push(
        "| Ticket | Brand | Status | Priority | Requester | Updated | Subject |\n|---|---|---|---|---|---|---|"
            .to_string(),
    );
    for ticket in tickets.iter().take(TABLE_LIMIT) {
        let priority = ticket.priority.as_deref().unwrap_or("n/a");
        let updated = safe_iso(ticket.zendesk_updated_at.as_deref());
        let subject = ticket.subject.replace('|', "\\|");
        lines.push(format!(
            "| #{} | {} | {} | {} | {} | {} | {} |",
            ticket.ticket_id,
            ticket.brand.as_str(),
            ticket.status,
            priority,
            requester_label(ticket),
            updated,
            subject
        ));
    }

    lines.join("\n")
}

fn table_projection(tickets: &[TicketRow]) -> Value {
    let rows: Vec<Value> = tickets
        .iter()
        .map(|ticket| {
            serde_json::json!({
                "ticket_id": ticket.ticket_id,
                "brand": ticket.brand.as_str(),
                "status": ticket.status,
                "priority": ticket.priority,
                "requester": requester_label(ticket),
                "updated_at": ticket.zendesk_updated_at,
                "subject": ticket.subject,
                "summary": ticket.summary_text,
            })
        })
        .collect();
    Value::Array(rows)
}

/// Create a digest from either an explicit ticket selection or a filter query.
/// The digest row commits before its linkage rows; a failure between the two
/// leaves the digest without links and surfaces an error to the caller.
pub async fn create_digest(
    pool: &Pool,
    ticket_ids: &[Value],
    filters: &DigestFilters,
    title: Option<&str>,
) -> Result<DigestCreated> {
    let now = Utc::now();
    let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t.to_string(),
        None => format!("Support Digest {}", now.format("%Y-%m-%d")),
    };

    let selected_ids = normalize_ticket_ids(ticket_ids);
    let tickets = if selected_ids.is_empty() {
        let brand = filters.brand.as_deref().filter(|b| *b != "all");
        let status = filters.status.as_deref().filter(|s| *s != "all");
        let search = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
        db::query_tickets(pool, brand, status, search, clamp_limit(filters.limit)).await?
    } else {
        db::list_tickets_by_ids(pool, &selected_ids).await?
    };

    if tickets.is_empty() {
        return Err(anyhow!("No tickets matched for digest generation."));
    }

    let source = if selected_ids.is_empty() {
        DigestSource::Filters
    } else {
        DigestSource::Selection
    };

    let digest = DigestRow {
        id: Uuid::new_v4().to_string(),
        title: title.clone(),
        source,
        filters: serde_json::to_value(filters)?,
        ticket_ids: tickets.iter().map(|t| t.ticket_id).collect(),
        content_markdown: render_digest_markdown(&title, &tickets, filters, now),
        content_table: table_projection(&tickets),
        created_at: now,
    };

    db::insert_digest(pool, &digest).await?;
    db::insert_digest_links(pool, &digest.id, &digest.ticket_ids).await?;

    info!(digest_id = %digest.id, ticket_count = tickets.len(), "digest created");
    Ok(DigestCreated {
        ok: true,
        digest,
        ticket_count: tickets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Brand;
    use serde_json::json;

    fn ticket(id: i64, brand: Brand, status: &str, subject: &str) -> TicketRow {
        TicketRow {
            ticket_id: id,
            brand,
            subject: subject.to_string(),
            status: status.to_string(),
            priority: None,
            requester_email: Some("player@example.com".into()),
            requester_name: None,
            assignee_email: None,
            zendesk_created_at: None,
            zendesk_updated_at: Some("2024-05-02T09:30:00Z".into()),
            ticket_url: None,
            summary_text: None,
            summary_updated_at: None,
            raw_payload: Value::Null,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn normalize_dedupes_and_drops_garbage() {
        let ids = normalize_ticket_ids(&[
            json!(101),
            json!("102"),
            json!(101),
            json!("not-a-number"),
            json!(null),
            json!(true),
        ]);
        assert_eq!(ids, vec![101, 102]);
    }

    #[test]
    fn limit_clamped_to_bounds() {
        assert_eq!(clamp_limit(None), 20);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(250)), 100);
        assert_eq!(clamp_limit(Some(50)), 50);
    }

    #[test]
    fn markdown_contains_breakdowns_and_escapes_pipes() {
        let tickets = vec![
            ticket(101, Brand::OmniArena, "open", "Headset | offline"),
            ticket(102, Brand::OmniOne, "new", "Billing question"),
            ticket(103, Brand::OmniArena, "open", "Controller drift"),
        ];
        let filters = DigestFilters {
            brand: Some("all".into()),
            ..Default::default()
        };
        let md = render_digest_markdown("Daily Digest", &tickets, &filters, Utc::now());

        assert!(md.starts_with("# Daily Digest"));
        assert!(md.contains("Tickets: 3"));
        assert!(md.contains("- open: 2"));
        assert!(md.contains("- new: 1"));
        assert!(md.contains("- omni_arena: 2"));
        assert!(md.contains("- omni_one: 1"));
        assert!(md.contains("- #101 [omni_arena/open] Headset | offline"));
        assert!(md.contains("Headset \\| offline"));
        assert!(md.contains("- Search: none"));
    }

    #[test]
    fn markdown_table_caps_at_fifty_rows() {
        let tickets: Vec<TicketRow> = (1..=60)
            .map(|id| ticket(id, Brand::OmniOne, "open", "subject"))
            .collect();
        let md = render_digest_markdown("Big", &tickets, &DigestFilters::default(), Utc::now());
        let table_rows = md.lines().filter(|l| l.starts_with("| #")).count();
        assert_eq!(table_rows, 50);

        // Action queue preview is bounded separately.
        let queue_rows = md.lines().filter(|l| l.starts_with("- #")).count();
        assert_eq!(queue_rows, 30);

        // Stored projection keeps everything.
        let projection = table_projection(&tickets);
        assert_eq!(projection.as_array().unwrap().len(), 60);
    }

    #[test]
    fn action_queue_prefers_cached_summary() {
        let mut t = ticket(101, Brand::OmniArena, "open", "Raw subject");
        t.summary_text = Some("  Short summary  ".into());
        let md = render_digest_markdown("D", &[t], &DigestFilters::default(), Utc::now());
        assert!(md.contains("- #101 [omni_arena/open] Short summary"));
    }
}
