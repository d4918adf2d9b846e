use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use playpulse_common::{Config, SourceKind};
use playpulse_listener::extractor::StrategyExtractor;
use playpulse_listener::{RedditClient, Scheduler, Store};

#[derive(Parser)]
#[command(name = "playpulse-listener")]
#[command(about = "Reddit ingestion pipeline for marketing intelligence")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single ingest cycle across all enabled sources
    RunOnce,

    /// Run the listener loop
    Run {
        /// Minutes to sleep between passes
        #[arg(long, default_value_t = 15)]
        interval_min: u64,
    },

    /// Add a subreddit source
    AddSubreddit {
        /// Subreddit name (without r/)
        subreddit: String,
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        group_id: Option<i64>,
    },

    /// Add a keyword query source
    AddQuery {
        /// Search query
        query: String,
        /// Limit the search to one subreddit
        #[arg(long)]
        subreddit: Option<String>,
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        group_id: Option<i64>,
    },

    /// Backfill historical posts for one source
    Backfill {
        #[arg(long)]
        source_id: i64,
        /// Hours to go back
        #[arg(long, default_value_t = 72)]
        hours: i64,
    },

    /// Delete a source and everything hanging off it
    Cleanup {
        #[arg(long)]
        source_id: i64,
        /// Require the source to belong to this user
        #[arg(long)]
        user_id: Option<i64>,
    },

    /// Extract strategy cards for stored items that lack one
    ReprocessCards {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show a sanitized configuration summary
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("playpulse=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::listener_from_env();

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config.summary())?);
        return Ok(());
    }

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    match cli.command {
        Commands::RunOnce => {
            let scheduler = build_scheduler(store, &config);
            scheduler.run_once().await?;
        }
        Commands::Run { interval_min } => {
            let scheduler = build_scheduler(store, &config);
            info!(interval_min, "Starting listener loop");
            loop {
                if let Err(e) = scheduler.run_once().await {
                    error!(error = %e, "Listener run failed");
                }
                info!(interval_min, "Sleeping until next pass");
                tokio::time::sleep(Duration::from_secs(interval_min * 60)).await;
            }
        }
        Commands::AddSubreddit {
            subreddit,
            user_id,
            group_id,
        } => {
            let id = store
                .create_source(user_id, group_id, SourceKind::Subreddit, &subreddit, None)
                .await?;
            info!(source_id = id, "Added subreddit source");
        }
        Commands::AddQuery {
            query,
            subreddit,
            user_id,
            group_id,
        } => {
            let id = store
                .create_source(
                    user_id,
                    group_id,
                    SourceKind::Keyword,
                    &query,
                    subreddit.as_deref(),
                )
                .await?;
            info!(source_id = id, "Added keyword source");
        }
        Commands::Backfill { source_id, hours } => {
            let scheduler = build_scheduler(store, &config);
            scheduler.backfill(source_id, hours).await?;
        }
        Commands::Cleanup { source_id, user_id } => {
            if store.delete_source(source_id, user_id).await? {
                info!(source_id, "Deleted source");
            } else {
                error!(source_id, "Source not found or user mismatch");
                std::process::exit(1);
            }
        }
        Commands::ReprocessCards { limit } => {
            let scheduler = build_scheduler(store, &config);
            scheduler.reprocess_cards(limit).await?;
        }
        Commands::Config => unreachable!(),
    }

    Ok(())
}

fn build_scheduler(store: Store, config: &Config) -> Scheduler {
    let fetcher = Arc::new(RedditClient::new());
    let extractor = StrategyExtractor::from_config(&config.llm);
    Scheduler::new(store, fetcher, extractor, config.clone())
}
