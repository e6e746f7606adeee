//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{Brand, DigestSource, SyncStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Full ticket snapshot held in the cache. `raw_payload` is the source record
/// as received from Zendesk and is passed through opaquely.
#[derive(Debug, Clone, Serialize)]
pub struct TicketRow {
    pub ticket_id: i64,
    pub brand: Brand,
    pub subject: String,
    pub status: String,
    pub priority: Option<String>,
    pub requester_email: Option<String>,
    pub requester_name: Option<String>,
    pub assignee_email: Option<String>,
    pub zendesk_created_at: Option<String>,
    pub zendesk_updated_at: Option<String>,
    pub ticket_url: Option<String>,
    pub summary_text: Option<String>,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub raw_payload: Value,
    pub synced_at: DateTime<Utc>,
}

/// Fields written by the sync engine. Summary columns are not listed here so
/// an upsert cannot clobber a previously generated summary.
#[derive(Debug, Clone)]
pub struct TicketUpsert {
    pub ticket_id: i64,
    pub brand: Brand,
    pub subject: String,
    pub status: String,
    pub priority: Option<String>,
    pub requester_email: Option<String>,
    pub requester_name: Option<String>,
    pub assignee_email: Option<String>,
    pub zendesk_created_at: Option<String>,
    pub zendesk_updated_at: Option<String>,
    pub ticket_url: Option<String>,
    pub raw_payload: Value,
    pub synced_at: DateTime<Utc>,
}

/// Ledger entry for one sync attempt.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunRow {
    pub id: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cursor: Option<i64>,
    pub tickets_fetched: i64,
    pub tickets_upserted: i64,
    pub error_message: Option<String>,
}

/// Stored AI summary for a ticket.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub ticket_id: i64,
    pub summary_text: String,
    pub key_actions: Vec<String>,
    pub next_steps: Vec<String>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

/// Persisted digest artifact. `filters`, `ticket_ids` and `content_table`
/// are the JSON snapshots taken when the digest was created.
#[derive(Debug, Clone, Serialize)]
pub struct DigestRow {
    pub id: String,
    pub title: String,
    pub source: DigestSource,
    pub filters: Value,
    pub ticket_ids: Vec<i64>,
    pub content_markdown: String,
    pub content_table: Value,
    pub created_at: DateTime<Utc>,
}
