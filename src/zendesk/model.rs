//! Wire models for the Zendesk incremental ticket export endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One page of the incremental export stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncrementalPage {
    #[serde(default)]
    pub tickets: Vec<ZendeskTicket>,
    pub end_time: Option<i64>,
    #[serde(default)]
    pub end_of_stream: bool,
    pub next_page: Option<String>,
}

/// A ticket as returned by Zendesk. Only the fields the hub cares about are
/// typed; everything else is retained in `extra` so the raw payload survives
/// a serialize round trip intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZendeskTicket {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester: Option<Requester>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Assignee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// API self-link of the ticket, e.g. `https://acme.zendesk.com/api/v2/tickets/1.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requester {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignee {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
