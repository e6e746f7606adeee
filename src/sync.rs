//! Incremental Zendesk sync engine.
//!
//! Pulls every ticket change since a watermark, classifies each by brand and
//! reconciles them into the ticket cache, while the sync-run ledger guarantees
//! at most one run executes at a time across all processes. Partial failures
//! leave an auditable error row carrying whatever counts were accumulated.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::BrandIds;
use crate::db::{self, Pool, TicketUpsert};
use crate::model::BrandFilter;
use crate::zendesk::model::{IncrementalPage, ZendeskTicket};
use crate::zendesk::{build_ticket_url, TicketSource};

/// Bounds worst-case run duration under heavy backlog; remaining work is
/// picked up by the next invocation via the advanced watermark.
const MAX_PAGES: usize = 20;

/// A `running` row older than this is treated as abandoned by a crashed
/// worker and reclaimed before a new run starts.
const STALE_RUN_MINUTES: i64 = 20;

const STALE_LOCK_MESSAGE: &str =
    "Recovered stale running lock before starting new sync run.";

/// Backoff schedule for transient upstream failures (429 and 5xx).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let doubled = self.base.saturating_mul(1u32 << (attempt - 1).min(16));
        doubled.min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub brand: BrandFilter,
    pub start_time: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub ok: bool,
    pub run_id: String,
    pub brand: BrandFilter,
    pub tickets_fetched: i64,
    pub tickets_upserted: i64,
    pub cursor: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncSkipped {
    pub ok: bool,
    pub skipped: bool,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SyncSkipped),
}

fn skipped() -> SyncOutcome {
    SyncOutcome::Skipped(SyncSkipped {
        ok: true,
        skipped: true,
        reason: "A sync run is already in progress.".to_string(),
    })
}

#[derive(Debug)]
struct Progress {
    fetched: i64,
    upserted: i64,
    cursor: i64,
}

/// Execute one sync cycle. Returns `SyncOutcome::Skipped` when another run
/// holds a fresh running lock; any error raised after the ledger row exists
/// is recorded on that row before propagating.
pub async fn run_sync(
    pool: &Pool,
    source: &dyn TicketSource,
    brands: &BrandIds,
    options: SyncOptions,
    retry: &RetryPolicy,
) -> Result<SyncOutcome> {
    let cursor = match options.start_time {
        Some(explicit) => explicit,
        None => match db::latest_success_cursor(pool).await? {
            Some(seed) => seed,
            None => Utc::now().timestamp() - 3600,
        },
    };

    if let Some(run) = db::find_running_run(pool).await? {
        let age = Utc::now() - run.started_at;
        if age > ChronoDuration::minutes(STALE_RUN_MINUTES) {
            warn!(run_id = %run.id, "recovering stale running sync lock");
            db::reclaim_stale_run(pool, &run.id, STALE_LOCK_MESSAGE).await?;
        } else {
            return Ok(skipped());
        }
    }

    // A lost race on the insert shows up as a unique violation and is
    // treated exactly like finding a fresh running row.
    let Some(run_id) = db::insert_running_run(pool, cursor, Utc::now()).await? else {
        return Ok(skipped());
    };

    let mut progress = Progress {
        fetched: 0,
        upserted: 0,
        cursor,
    };

    match paginate(pool, source, brands, options.brand, retry, &mut progress).await {
        Ok(()) => {
            db::mark_run_success(
                pool,
                &run_id,
                progress.fetched,
                progress.upserted,
                progress.cursor,
            )
            .await?;
            info!(
                run_id = %run_id,
                fetched = progress.fetched,
                upserted = progress.upserted,
                cursor = progress.cursor,
                "sync run completed"
            );
            Ok(SyncOutcome::Completed(SyncReport {
                ok: true,
                run_id,
                brand: options.brand,
                tickets_fetched: progress.fetched,
                tickets_upserted: progress.upserted,
                cursor: progress.cursor,
            }))
        }
        Err(err) => {
            db::mark_run_error(
                pool,
                &run_id,
                progress.fetched,
                progress.upserted,
                &format!("{err:#}"),
            )
            .await?;
            Err(err)
        }
    }
}

async fn paginate(
    pool: &Pool,
    source: &dyn TicketSource,
    brands: &BrandIds,
    brand_filter: BrandFilter,
    retry: &RetryPolicy,
    progress: &mut Progress,
) -> Result<()> {
    let mut next_url = Some(source.first_page_url(progress.cursor));
    let mut page = 0usize;

    while let Some(url) = next_url {
        if page >= MAX_PAGES {
            break;
        }
        let page_data = fetch_page_with_retry(source, &url, retry).await?;

        let synced_at = Utc::now();
        let batch = page_data
            .tickets
            .iter()
            .filter(|ticket| brand_filter.matches(brands.classify(ticket.brand_id)))
            .map(|ticket| map_ticket(ticket, brands, synced_at))
            .collect::<Result<Vec<TicketUpsert>>>()?;

        progress.fetched += batch.len() as i64;
        if !batch.is_empty() {
            db::upsert_tickets(pool, &batch).await?;
            progress.upserted += batch.len() as i64;
        }

        if let Some(end_time) = page_data.end_time {
            progress.cursor = end_time;
        }
        next_url = advance(&page_data);
        page += 1;
    }

    Ok(())
}

fn advance(page: &IncrementalPage) -> Option<String> {
    if page.end_of_stream {
        None
    } else {
        page.next_page.clone()
    }
}

async fn fetch_page_with_retry(
    source: &dyn TicketSource,
    url: &str,
    retry: &RetryPolicy,
) -> Result<IncrementalPage> {
    let mut attempt = 1u32;
    loop {
        match source.fetch_page(url).await {
            Ok(page) => return Ok(page),
            Err(err) if err.is_retryable() && attempt < retry.max_attempts => {
                let delay = err.retry_after().unwrap_or_else(|| retry.backoff(attempt));
                warn!(attempt, url, error = %err, delay_ms = delay.as_millis() as u64, "retrying Zendesk fetch");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn map_ticket(
    ticket: &ZendeskTicket,
    brands: &BrandIds,
    synced_at: DateTime<Utc>,
) -> Result<TicketUpsert> {
    Ok(TicketUpsert {
        ticket_id: ticket.id,
        brand: brands.classify(ticket.brand_id),
        subject: ticket.subject.clone().unwrap_or_default(),
        status: ticket.status.clone().unwrap_or_else(|| "new".to_string()),
        priority: ticket.priority.clone(),
        requester_email: ticket.requester.as_ref().and_then(|r| r.email.clone()),
        requester_name: ticket.requester.as_ref().and_then(|r| r.name.clone()),
        assignee_email: ticket.assignee.as_ref().and_then(|a| a.email.clone()),
        zendesk_created_at: ticket.created_at.clone(),
        zendesk_updated_at: ticket.updated_at.clone(),
        ticket_url: build_ticket_url(ticket.url.as_deref(), ticket.id),
        raw_payload: serde_json::to_value(ticket)?,
        synced_at,
    })
}
