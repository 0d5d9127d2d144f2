//! # Promo Sync Entry Point
//!
//! `serve` runs the scheduler until Ctrl-C; the other subcommands run one pass
//! inline or read the ledger directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use promo_sync::{
    collection_sync::CollectionSync,
    config::ConfigLoader,
    db,
    models::SyncTrigger,
    scheduler::SyncScheduler,
    shopify::ShopifyClient,
    sync_executor::{SyncExecutor, SyncRequest},
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "promo-sync")]
#[command(about = "Mirror Shopify price rules and discount codes into a local store", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (default)
    ///
    /// The code-created trigger handle belongs to whatever embeds the scheduler
    /// next to the admin API; the bare binary only holds it until shutdown, so
    /// startup and daily runs are the only triggers here.
    Serve,

    /// Run one sync inline and print the final job
    Run {
        /// Only walk rules created in the last N minutes
        #[arg(long, conflicts_with = "full", value_parser = clap::value_parser!(i64).range(1..))]
        lookback_minutes: Option<i64>,

        /// Walk the full rule history
        #[arg(long)]
        full: bool,
    },

    /// Mirror the storefront collection list once and print the counts
    Collections,

    /// Print one sync job
    Status {
        /// Job ID
        job_id: Uuid,
    },

    /// Print recent sync jobs, newest first
    Jobs {
        #[arg(short = 'n', long, default_value = "20")]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;
    init_tracing(&config)?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let conn = db::init_pool(&config).await?;
    db::migrate(&conn).await?;
    db::health_check(&conn).await?;

    let client = ShopifyClient::new(&config.shopify)?;
    let executor = SyncExecutor::new(conn.clone(), client.clone(), config.sync.clone());
    let collection_sync = CollectionSync::new(conn, client);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let (mut scheduler, triggers) = SyncScheduler::new(&config, executor)?;
            if config.scheduler.collections_enabled {
                scheduler = scheduler.with_collection_sync(collection_sync);
            }
            let shutdown = CancellationToken::new();
            let handle = tokio::spawn(scheduler.run(shutdown.clone()));

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            shutdown.cancel();
            handle.await.context("Scheduler task panicked")?;
            drop(triggers);
        }
        Commands::Collections => match collection_sync.run().await? {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("collection sync already running"),
        },
        Commands::Run {
            lookback_minutes,
            full,
        } => {
            let lookback = if full {
                None
            } else {
                Some(
                    lookback_minutes
                        .map(chrono::Duration::minutes)
                        .unwrap_or_else(|| executor.config().scheduled_lookback()),
                )
            };
            let job = executor
                .sync_now(SyncRequest::new(SyncTrigger::Manual, lookback))
                .await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Status { job_id } => {
            let job = executor.job_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::Jobs { limit } => {
            let jobs = executor.jobs().list_recent(limit).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
    }

    Ok(())
}
