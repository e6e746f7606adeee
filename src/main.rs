use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

use support_hub::config;
use support_hub::db;
use support_hub::digest;
use support_hub::model::{BrandFilter, DigestFilters};
use support_hub::notify::{self, NotifyTarget};
use support_hub::openai::OpenAiClient;
use support_hub::slack::SlackWebhook;
use support_hub::summarize;
use support_hub::sync::{self, RetryPolicy, SyncOptions};
use support_hub::zendesk::ZendeskClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Support hub: Zendesk ticket sync, digests, AI summaries and Slack notifications"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pull ticket changes from Zendesk into the local cache
    Sync {
        #[arg(long, value_enum, default_value = "all")]
        brand: BrandFilter,
        /// Unix-timestamp watermark override for this run
        #[arg(long)]
        start_time: Option<i64>,
    },
    /// Build and store a digest of cached tickets
    Digest {
        /// Explicit ticket ids (comma separated); overrides the filters
        #[arg(long, value_delimiter = ',')]
        ticket_ids: Vec<i64>,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Generate (or return the cached) AI summary for one ticket
    Summarize {
        #[arg(long)]
        ticket_id: i64,
        /// Regenerate even when a cached summary exists
        #[arg(long)]
        refresh: bool,
    },
    /// Post a digest, ticket summary or plain text to the Slack webhook
    Notify {
        #[command(subcommand)]
        target: NotifyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum NotifyCommand {
    Digest {
        #[arg(long)]
        digest_id: String,
    },
    TicketSummary {
        #[arg(long)]
        ticket_id: i64,
    },
    Text {
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "error": format!("{err:#}") }))?
            );
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<Value> {
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/support-hub.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Sync { brand, start_time } => {
            let source = ZendeskClient::from_config(&cfg.zendesk)?;
            let outcome = sync::run_sync(
                &pool,
                &source,
                &cfg.zendesk.brands,
                SyncOptions { brand, start_time },
                &RetryPolicy::default(),
            )
            .await?;
            Ok(serde_json::to_value(outcome)?)
        }
        Command::Digest {
            ticket_ids,
            brand,
            status,
            search,
            limit,
            title,
        } => {
            let ids: Vec<Value> = ticket_ids.into_iter().map(Value::from).collect();
            let filters = DigestFilters {
                brand,
                status,
                search,
                limit,
            };
            let created = digest::create_digest(&pool, &ids, &filters, title.as_deref()).await?;
            Ok(serde_json::to_value(created)?)
        }
        Command::Summarize { ticket_id, refresh } => {
            let completions = OpenAiClient::from_config(&cfg.openai);
            let response =
                summarize::summarize_ticket(&pool, &completions, ticket_id, refresh).await?;
            Ok(serde_json::to_value(response)?)
        }
        Command::Notify { target } => {
            let webhook = SlackWebhook::from_config(&cfg.slack);
            let target = match target {
                NotifyCommand::Digest { digest_id } => NotifyTarget::Digest { digest_id },
                NotifyCommand::TicketSummary { ticket_id } => {
                    NotifyTarget::TicketSummary { ticket_id }
                }
                NotifyCommand::Text { text } => NotifyTarget::PlainText { text },
            };
            let receipt = notify::send_notification(&pool, &webhook, target).await?;
            Ok(serde_json::to_value(receipt)?)
        }
    }
}
