use super::model::{DigestRow, SummaryRow, SyncRunRow, TicketRow, TicketUpsert};
use crate::model::{Brand, DigestSource, SyncStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the parent
/// directory exists. Non-sqlite and in-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Ticket cache
// ---------------------------------------------------------------------------

/// Replace-by-key upsert of a batch of ticket snapshots. Summary columns are
/// deliberately left out of the conflict update so refreshing a ticket never
/// erases its cached AI summary.
#[instrument(skip_all, fields(count = records.len()))]
pub async fn upsert_tickets(pool: &Pool, records: &[TicketUpsert]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        upsert_ticket_tx(&mut tx, record).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn upsert_ticket_tx(tx: &mut Transaction<'_, Sqlite>, record: &TicketUpsert) -> Result<()> {
    let raw = serde_json::to_string(&record.raw_payload)?;
    sqlx::query(
        "INSERT INTO ticket_cache (ticket_id, brand, subject, status, priority, \
                requester_email, requester_name, assignee_email, \
                zendesk_created_at, zendesk_updated_at, ticket_url, raw_payload, synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (ticket_id) DO UPDATE SET \
                brand = excluded.brand, \
                subject = excluded.subject, \
                status = excluded.status, \
                priority = excluded.priority, \
                requester_email = excluded.requester_email, \
                requester_name = excluded.requester_name, \
                assignee_email = excluded.assignee_email, \
                zendesk_created_at = excluded.zendesk_created_at, \
                zendesk_updated_at = excluded.zendesk_updated_at, \
                ticket_url = excluded.ticket_url, \
                raw_payload = excluded.raw_payload, \
                synced_at = excluded.synced_at",
    )
    .bind(record.ticket_id)
    .bind(record.brand.as_str())
    .bind(&record.subject)
    .bind(&record.status)
    .bind(&record.priority)
    .bind(&record.requester_email)
    .bind(&record.requester_name)
    .bind(&record.assignee_email)
    .bind(&record.zendesk_created_at)
    .bind(&record.zendesk_updated_at)
    .bind(&record.ticket_url)
    .bind(raw)
    .bind(record.synced_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const TICKET_COLUMNS: &str = "ticket_id, brand, subject, status, priority, requester_email, \
     requester_name, assignee_email, zendesk_created_at, zendesk_updated_at, \
     ticket_url, summary_text, summary_updated_at, raw_payload, synced_at";

fn ticket_from_row(row: &SqliteRow) -> TicketRow {
    let brand: String = row.get("brand");
    let raw: String = row.get("raw_payload");
    TicketRow {
        ticket_id: row.get("ticket_id"),
        brand: Brand::parse_brand(&brand).unwrap_or(Brand::Unknown),
        subject: row.get("subject"),
        status: row.get("status"),
        priority: row.get("priority"),
        requester_email: row.get("requester_email"),
        requester_name: row.get("requester_name"),
        assignee_email: row.get("assignee_email"),
        zendesk_created_at: row.get("zendesk_created_at"),
        zendesk_updated_at: row.get("zendesk_updated_at"),
        ticket_url: row.get("ticket_url"),
        summary_text: row.get("summary_text"),
        summary_updated_at: row.get("summary_updated_at"),
        raw_payload: serde_json::from_str(&raw).unwrap_or(Value::Null),
        synced_at: row.get("synced_at"),
    }
}

#[instrument(skip_all)]
pub async fn get_ticket(pool: &Pool, ticket_id: i64) -> Result<Option<TicketRow>> {
    let row = sqlx::query(&format!(
        "SELECT {TICKET_COLUMNS} FROM ticket_cache WHERE ticket_id = ?"
    ))
    .bind(ticket_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(ticket_from_row))
}

/// Query cached tickets ordered by most-recently-updated first. `brand` and
/// `status` are exact matches; `search` is a case-insensitive substring match
/// on the subject.
#[instrument(skip_all)]
pub async fn query_tickets(
    pool: &Pool,
    brand: Option<&str>,
    status: Option<&str>,
    search: Option<&str>,
    limit: i64,
) -> Result<Vec<TicketRow>> {
    let mut sql = format!("SELECT {TICKET_COLUMNS} FROM ticket_cache WHERE 1 = 1");
    if brand.is_some() {
        sql.push_str(" AND brand = ?");
    }
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if search.is_some() {
        sql.push_str(" AND lower(subject) LIKE ?");
    }
    sql.push_str(" ORDER BY zendesk_updated_at DESC LIMIT ?");

    let mut query = sqlx::query(&sql);
    if let Some(brand) = brand {
        query = query.bind(brand.to_string());
    }
    if let Some(status) = status {
        query = query.bind(status.to_string());
    }
    if let Some(search) = search {
        query = query.bind(format!("%{}%", search.trim().to_lowercase()));
    }
    let rows = query.bind(limit).fetch_all(pool).await?;
    Ok(rows.iter().map(ticket_from_row).collect())
}

/// Fetch exactly the given tickets, most-recently-updated first.
#[instrument(skip_all)]
pub async fn list_tickets_by_ids(pool: &Pool, ids: &[i64]) -> Result<Vec<TicketRow>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM ticket_cache WHERE ticket_id IN ({placeholders}) \
         ORDER BY zendesk_updated_at DESC"
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(ticket_from_row).collect())
}

/// Mirror a freshly generated summary into the ticket row for cheap reads.
#[instrument(skip_all)]
pub async fn set_ticket_summary(
    pool: &Pool,
    ticket_id: i64,
    summary_text: &str,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE ticket_cache SET summary_text = ?, summary_updated_at = ? WHERE ticket_id = ?")
        .bind(summary_text)
        .bind(updated_at)
        .bind(ticket_id)
        .execute(pool)
        .await
        .context("failed to update ticket cache summary")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync run ledger
// ---------------------------------------------------------------------------

/// Insert a `running` ledger row. Returns `None` when another run already
/// holds the running lock (unique violation on the partial index).
#[instrument(skip_all)]
pub async fn insert_running_run(
    pool: &Pool,
    cursor: i64,
    started_at: DateTime<Utc>,
) -> Result<Option<String>> {
    let id = Uuid::new_v4().to_string();
    let res = sqlx::query(
        "INSERT INTO sync_runs (id, status, started_at, cursor) VALUES (?, 'running', ?, ?)",
    )
    .bind(&id)
    .bind(started_at)
    .bind(cursor)
    .execute(pool)
    .await;
    match res {
        Ok(_) => Ok(Some(id)),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Ok(None),
        Err(err) => Err(err).context("failed to insert sync run"),
    }
}

fn run_from_row(row: &SqliteRow) -> Result<SyncRunRow> {
    let status: String = row.get("status");
    let status = SyncStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("sync run has unknown status {}", status))?;
    Ok(SyncRunRow {
        id: row.get("id"),
        status,
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        cursor: row.get("cursor"),
        tickets_fetched: row.get("tickets_fetched"),
        tickets_upserted: row.get("tickets_upserted"),
        error_message: row.get("error_message"),
    })
}

const RUN_COLUMNS: &str = "id, status, started_at, finished_at, cursor, \
     tickets_fetched, tickets_upserted, error_message";

#[instrument(skip_all)]
pub async fn find_running_run(pool: &Pool) -> Result<Option<SyncRunRow>> {
    let row = sqlx::query(&format!(
        "SELECT {RUN_COLUMNS} FROM sync_runs WHERE status = 'running' \
         ORDER BY started_at DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(run_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_run(pool: &Pool, run_id: &str) -> Result<Option<SyncRunRow>> {
    let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?"))
        .bind(run_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(run_from_row).transpose()
}

/// Cursor of the most recent successful run; seeds the next run.
#[instrument(skip_all)]
pub async fn latest_success_cursor(pool: &Pool) -> Result<Option<i64>> {
    let cursor: Option<i64> = sqlx::query_scalar(
        "SELECT cursor FROM sync_runs WHERE status = 'success' AND cursor IS NOT NULL \
         ORDER BY started_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(cursor)
}

#[instrument(skip_all)]
pub async fn mark_run_success(
    pool: &Pool,
    run_id: &str,
    tickets_fetched: i64,
    tickets_upserted: i64,
    cursor: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_runs SET status = 'success', finished_at = ?, \
                tickets_fetched = ?, tickets_upserted = ?, cursor = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(tickets_fetched)
    .bind(tickets_upserted)
    .bind(cursor)
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to finalize sync run")?;
    Ok(())
}

/// Terminate a run as failed, keeping whatever counts were accumulated so the
/// partial progress stays observable.
#[instrument(skip_all)]
pub async fn mark_run_error(
    pool: &Pool,
    run_id: &str,
    tickets_fetched: i64,
    tickets_upserted: i64,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_runs SET status = 'error', finished_at = ?, \
                tickets_fetched = ?, tickets_upserted = ?, error_message = ? WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(tickets_fetched)
    .bind(tickets_upserted)
    .bind(message)
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to record sync run error")?;
    Ok(())
}

/// Force an abandoned `running` row to `error` without touching its counts.
#[instrument(skip_all)]
pub async fn reclaim_stale_run(pool: &Pool, run_id: &str, message: &str) -> Result<()> {
    sqlx::query("UPDATE sync_runs SET status = 'error', finished_at = ?, error_message = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(message)
        .bind(run_id)
        .execute(pool)
        .await
        .context("failed to reclaim stale sync run")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Ticket summaries
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn upsert_summary(pool: &Pool, summary: &SummaryRow) -> Result<()> {
    let key_actions = serde_json::to_string(&summary.key_actions)?;
    let next_steps = serde_json::to_string(&summary.next_steps)?;
    sqlx::query(
        "INSERT INTO ticket_summaries (ticket_id, summary_text, key_actions, next_steps, model, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT (ticket_id) DO UPDATE SET \
                summary_text = excluded.summary_text, \
                key_actions = excluded.key_actions, \
                next_steps = excluded.next_steps, \
                model = excluded.model, \
                updated_at = excluded.updated_at",
    )
    .bind(summary.ticket_id)
    .bind(&summary.summary_text)
    .bind(key_actions)
    .bind(next_steps)
    .bind(&summary.model)
    .bind(summary.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_summary(pool: &Pool, ticket_id: i64) -> Result<Option<SummaryRow>> {
    let row = sqlx::query(
        "SELECT ticket_id, summary_text, key_actions, next_steps, model, updated_at \
         FROM ticket_summaries WHERE ticket_id = ?",
    )
    .bind(ticket_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let key_actions: String = row.get("key_actions");
    let next_steps: String = row.get("next_steps");
    Ok(Some(SummaryRow {
        ticket_id: row.get("ticket_id"),
        summary_text: row.get("summary_text"),
        key_actions: serde_json::from_str(&key_actions).unwrap_or_default(),
        next_steps: serde_json::from_str(&next_steps).unwrap_or_default(),
        model: row.get("model"),
        updated_at: row.get("updated_at"),
    }))
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_digest(pool: &Pool, digest: &DigestRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO digests (id, title, source, filters, ticket_ids, \
                content_markdown, content_table, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&digest.id)
    .bind(&digest.title)
    .bind(digest.source.as_str())
    .bind(serde_json::to_string(&digest.filters)?)
    .bind(serde_json::to_string(&digest.ticket_ids)?)
    .bind(&digest.content_markdown)
    .bind(serde_json::to_string(&digest.content_table)?)
    .bind(digest.created_at)
    .execute(pool)
    .await
    .context("failed to store digest")?;
    Ok(())
}

/// Membership rows tying a digest to every ticket it includes. Inserted after
/// the digest row; the digest is not rolled back if this step fails.
#[instrument(skip_all)]
pub async fn insert_digest_links(pool: &Pool, digest_id: &str, ticket_ids: &[i64]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for ticket_id in ticket_ids {
        sqlx::query("INSERT INTO digest_tickets (digest_id, ticket_id) VALUES (?, ?)")
            .bind(digest_id)
            .bind(ticket_id)
            .execute(&mut *tx)
            .await
            .context("failed to map digest tickets")?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_digest(pool: &Pool, digest_id: &str) -> Result<Option<DigestRow>> {
    let row = sqlx::query(
        "SELECT id, title, source, filters, ticket_ids, content_markdown, content_table, created_at \
         FROM digests WHERE id = ?",
    )
    .bind(digest_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let source: String = row.get("source");
    let source = match source.as_str() {
        "selection" => DigestSource::Selection,
        _ => DigestSource::Filters,
    };
    let filters: String = row.get("filters");
    let ticket_ids: String = row.get("ticket_ids");
    let content_table: String = row.get("content_table");
    Ok(Some(DigestRow {
        id: row.get("id"),
        title: row.get("title"),
        source,
        filters: serde_json::from_str(&filters).unwrap_or(Value::Null),
        ticket_ids: serde_json::from_str(&ticket_ids).unwrap_or_default(),
        content_markdown: row.get("content_markdown"),
        content_table: serde_json::from_str(&content_table).unwrap_or(Value::Null),
        created_at: row.get("created_at"),
    }))
}

#[instrument(skip_all)]
pub async fn list_digest_ticket_ids(pool: &Pool, digest_id: &str) -> Result<Vec<i64>> {
    let ids: Vec<i64> =
        sqlx::query_scalar("SELECT ticket_id FROM digest_tickets WHERE digest_id = ? ORDER BY ticket_id")
            .bind(digest_id)
            .fetch_all(pool)
            .await?;
    Ok(ids)
}
