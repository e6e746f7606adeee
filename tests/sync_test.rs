use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use support_hub::config::BrandIds;
use support_hub::db;
use support_hub::model::{Brand, BrandFilter, SyncStatus};
use support_hub::sync::{run_sync, RetryPolicy, SyncOptions, SyncOutcome};
use support_hub::zendesk::model::{IncrementalPage, ZendeskTicket};
use support_hub::zendesk::{FetchError, TicketSource};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn brands() -> BrandIds {
    BrandIds {
        omni_one: Some(1),
        omni_arena: Some(2),
    }
}

/// Zero-delay retries so backoff paths run instantly under test.
fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base: Duration::ZERO,
        cap: Duration::ZERO,
    }
}

fn ticket(id: i64, brand_id: i64) -> ZendeskTicket {
    serde_json::from_value(json!({
        "id": id,
        "subject": format!("Ticket {id}"),
        "status": "open",
        "brand_id": brand_id,
        "updated_at": "2024-05-02T09:30:00Z",
        "url": format!("https://acme.zendesk.com/api/v2/tickets/{id}.json"),
    }))
    .unwrap()
}

fn page(tickets: Vec<ZendeskTicket>, end_time: i64, end_of_stream: bool) -> IncrementalPage {
    IncrementalPage {
        tickets,
        end_time: Some(end_time),
        end_of_stream,
        next_page: if end_of_stream {
            None
        } else {
            Some("mock://incremental/page-2".to_string())
        },
    }
}

fn rate_limited(retry_after: Option<Duration>) -> FetchError {
    FetchError::Status {
        status: 429,
        retry_after,
        body: "rate limited".into(),
    }
}

#[derive(Clone, Default)]
struct RecordingSource {
    responses: Arc<Mutex<VecDeque<Result<IncrementalPage, FetchError>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl RecordingSource {
    fn with_responses(responses: Vec<Result<IncrementalPage, FetchError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl TicketSource for RecordingSource {
    fn first_page_url(&self, start_time: i64) -> String {
        format!("mock://incremental?start_time={start_time}")
    }

    async fn fetch_page(&self, url: &str) -> Result<IncrementalPage, FetchError> {
        self.requests.lock().await.push(url.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(IncrementalPage {
                end_of_stream: true,
                ..Default::default()
            }))
    }
}

fn options(brand: BrandFilter, start_time: Option<i64>) -> SyncOptions {
    SyncOptions { brand, start_time }
}

#[tokio::test]
async fn single_page_sync_populates_cache_and_ledger() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![Ok(page(
        vec![ticket(101, 2), ticket(102, 1)],
        1700001000,
        true,
    ))]);

    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.tickets_fetched, 2);
    assert_eq!(report.tickets_upserted, 2);
    assert_eq!(report.cursor, 1700001000);

    let run = db::get_run(&pool, &report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, SyncStatus::Success);
    assert_eq!(run.tickets_fetched, 2);
    assert_eq!(run.cursor, Some(1700001000));

    let arena = db::get_ticket(&pool, 101).await.unwrap().unwrap();
    assert_eq!(arena.brand, Brand::OmniArena);
    assert_eq!(
        arena.ticket_url.as_deref(),
        Some("https://acme.zendesk.com/agent/tickets/101")
    );
    let one = db::get_ticket(&pool, 102).await.unwrap().unwrap();
    assert_eq!(one.brand, Brand::OmniOne);
}

#[tokio::test]
async fn brand_filter_drops_other_brands() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![Ok(page(
        vec![ticket(101, 2), ticket(102, 1), ticket(103, 999)],
        1700001000,
        true,
    ))]);

    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::OmniArena, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.tickets_fetched, 1);
    assert_eq!(report.tickets_upserted, 1);

    assert!(db::get_ticket(&pool, 101).await.unwrap().is_some());
    assert!(db::get_ticket(&pool, 102).await.unwrap().is_none());
    assert!(db::get_ticket(&pool, 103).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_brand_retained_under_all_filter() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![Ok(page(
        vec![ticket(104, 999)],
        1700001000,
        true,
    ))]);

    run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    let unknown = db::get_ticket(&pool, 104).await.unwrap().unwrap();
    assert_eq!(unknown.brand, Brand::Unknown);
}

#[tokio::test]
async fn transient_errors_retried_until_success() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![
        Err(rate_limited(None)),
        Err(rate_limited(Some(Duration::ZERO))),
        Err(rate_limited(None)),
        Ok(page(vec![ticket(101, 2)], 1700001000, true)),
    ]);

    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    assert!(matches!(outcome, SyncOutcome::Completed(_)));
    // 3 rate-limited attempts plus the successful fetch.
    assert_eq!(source.requests().await.len(), 4);
}

#[tokio::test]
async fn non_retryable_error_aborts_immediately() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![Err(FetchError::Status {
        status: 400,
        retry_after: None,
        body: "bad start_time".into(),
    })]);

    let err = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(source.requests().await.len(), 1);

    let run = db::find_running_run(&pool).await.unwrap();
    assert!(run.is_none());
    let cursor = db::latest_success_cursor(&pool).await.unwrap();
    assert!(cursor.is_none());
}

#[tokio::test]
async fn retries_exhausted_marks_run_error() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![
        Err(rate_limited(None)),
        Err(rate_limited(None)),
        Err(rate_limited(None)),
        Err(rate_limited(None)),
        Err(rate_limited(None)),
    ]);

    let err = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("429"));
    assert_eq!(source.requests().await.len(), 5);
}

#[tokio::test]
async fn fresh_running_lock_skips_without_fetching() {
    let pool = setup_pool().await;
    let existing = db::insert_running_run(&pool, 1700000000, Utc::now())
        .await
        .unwrap()
        .unwrap();

    let source = RecordingSource::default();
    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, None),
        &fast_retry(),
    )
    .await
    .unwrap();

    let SyncOutcome::Skipped(skip) = outcome else {
        panic!("expected a skipped run");
    };
    assert!(skip.skipped);
    assert!(source.requests().await.is_empty());

    // The existing lock is untouched.
    let run = db::find_running_run(&pool).await.unwrap().unwrap();
    assert_eq!(run.id, existing);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_runs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn stale_running_lock_is_reclaimed() {
    let pool = setup_pool().await;
    let stale = db::insert_running_run(&pool, 1700000000, Utc::now() - ChronoDuration::minutes(25))
        .await
        .unwrap()
        .unwrap();

    let source = RecordingSource::with_responses(vec![Ok(page(
        vec![ticket(101, 2)],
        1700002000,
        true,
    ))]);
    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));

    let reclaimed = db::get_run(&pool, &stale).await.unwrap().unwrap();
    assert_eq!(reclaimed.status, SyncStatus::Error);
    assert!(reclaimed
        .error_message
        .as_deref()
        .unwrap()
        .contains("stale running lock"));
    assert!(reclaimed.finished_at.is_some());
}

#[tokio::test]
async fn successful_cursor_seeds_next_run() {
    let pool = setup_pool().await;
    let first = RecordingSource::with_responses(vec![Ok(page(
        vec![ticket(101, 2)],
        1700005000,
        true,
    ))]);
    run_sync(
        &pool,
        &first,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    let second = RecordingSource::with_responses(vec![Ok(IncrementalPage {
        end_of_stream: true,
        end_time: Some(1700005000),
        ..Default::default()
    })]);
    let outcome = run_sync(
        &pool,
        &second,
        &brands(),
        options(BrandFilter::All, None),
        &fast_retry(),
    )
    .await
    .unwrap();

    let requests = second.requests().await;
    assert_eq!(requests, vec!["mock://incremental?start_time=1700005000"]);

    // The watermark never regresses even when a page reports no end_time.
    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.cursor, 1700005000);
}

#[tokio::test]
async fn pagination_follows_next_page_until_end_of_stream() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![
        Ok(page(vec![ticket(101, 2)], 1700001000, false)),
        Ok(page(vec![ticket(102, 1)], 1700002000, true)),
    ]);

    let outcome = run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap();

    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(report.tickets_fetched, 2);
    assert_eq!(report.cursor, 1700002000);

    let requests = source.requests().await;
    assert_eq!(
        requests,
        vec![
            "mock://incremental?start_time=1700000000",
            "mock://incremental/page-2"
        ]
    );
}

#[tokio::test]
async fn mid_pagination_failure_keeps_partial_counts() {
    let pool = setup_pool().await;
    let source = RecordingSource::with_responses(vec![
        Ok(page(vec![ticket(101, 2)], 1700001000, false)),
        Err(FetchError::Status {
            status: 403,
            retry_after: None,
            body: "token revoked".into(),
        }),
    ]);

    run_sync(
        &pool,
        &source,
        &brands(),
        options(BrandFilter::All, Some(1700000000)),
        &fast_retry(),
    )
    .await
    .unwrap_err();

    let run: (String, i64, i64, Option<String>) = sqlx::query_as(
        "SELECT status, tickets_fetched, tickets_upserted, error_message FROM sync_runs",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(run.0, "error");
    assert_eq!(run.1, 1);
    assert_eq!(run.2, 1);
    assert!(run.3.unwrap().contains("403"));

    // The first page's tickets stay committed.
    assert!(db::get_ticket(&pool, 101).await.unwrap().is_some());
}
