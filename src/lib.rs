//! Support hub backend: incremental Zendesk ticket sync into a local cache,
//! digest generation, AI ticket summaries and Slack webhook notifications.

pub mod config;
pub mod db;
pub mod digest;
pub mod model;
pub mod notify;
pub mod openai;
pub mod slack;
pub mod summarize;
pub mod sync;
pub mod zendesk;
