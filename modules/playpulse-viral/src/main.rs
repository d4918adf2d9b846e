use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use playpulse_common::Config;
use playpulse_viral::tasks;
use playpulse_viral::{OutlierDetector, ScanOutcome};

#[derive(Parser)]
#[command(name = "playpulse-viral")]
#[command(about = "Viral outlier detection over competitor and hashtag posts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single locked scan
    Scan,
    /// Delete expired outlier records
    Cleanup,
    /// Run the periodic scan + cleanup loops
    RunPeriodic,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("playpulse=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::viral_from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let detector = OutlierDetector::new(pool, config.viral.clone());

    match cli.command {
        Commands::Scan => match tasks::scan_once(&detector).await? {
            ScanOutcome::Skipped => info!("Scan skipped: already running"),
            ScanOutcome::Completed {
                outliers_found,
                upserted,
                by_multiplier,
            } => {
                info!(
                    outliers_found,
                    upserted,
                    x100 = by_multiplier.x100,
                    x50 = by_multiplier.x50,
                    x10 = by_multiplier.x10,
                    x5 = by_multiplier.x5,
                    "Scan complete"
                );
            }
        },
        Commands::Cleanup => {
            let deleted = tasks::cleanup_once(&detector).await?;
            info!(deleted, "Cleanup complete");
        }
        Commands::RunPeriodic => {
            tasks::run_periodic(detector).await;
        }
    }

    Ok(())
}
