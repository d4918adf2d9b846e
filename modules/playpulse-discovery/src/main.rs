use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use playpulse_common::{Config, Platform, Tenant};
use playpulse_discovery::proxy::{ProxyMode, ProxyPool};
use playpulse_discovery::scraper::{HashtagScraper, ScraperFactory};
use playpulse_discovery::{DiscoveryEngine, PgDiscoveryStore};

#[derive(Parser)]
#[command(name = "playpulse-discovery")]
#[command(about = "Recursive hashtag discovery across competitor and hashtag posts")]
#[command(version)]
struct Cli {
    /// Platform to discover hashtags for (instagram or tiktok)
    #[arg(long, default_value = "instagram")]
    platform: String,

    /// Restrict candidate hashtags to this user's tracked competitors
    #[arg(long)]
    user_id: Option<i64>,

    #[arg(long)]
    group_id: Option<i64>,

    /// Seed hashtags injected ahead of organic candidates
    #[arg(long)]
    seed: Vec<String>,

    /// Proxy URL, or the literal DIRECT to disable proxying
    #[arg(long)]
    proxy: Option<String>,

    /// Discovery iterations (hard-capped at 10)
    #[arg(long, default_value_t = 3)]
    iterations: u32,

    /// Hashtags to scrape per iteration
    #[arg(long, default_value_t = 10)]
    max_hashtags: usize,

    /// Posts to capture per hashtag
    #[arg(long, default_value_t = 50)]
    max_posts: u32,
}

/// The browser-automation drivers live outside this repository; the stub
/// factory makes the binary honest about that when run without one wired in.
struct UnconfiguredFactory;

#[async_trait]
impl ScraperFactory for UnconfiguredFactory {
    async fn create(
        &self,
        _platform: Platform,
        _proxy: Option<&str>,
    ) -> Result<Box<dyn HashtagScraper>> {
        Err(anyhow!(
            "no scraper driver configured; wire a HashtagScraper implementation into the factory"
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("playpulse=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::listener_from_env();

    let platform = Platform::from_str_loose(&cli.platform)
        .ok_or_else(|| anyhow!("unsupported platform: {}", cli.platform))?;

    let tenant = cli.user_id.map(|owner_id| Tenant {
        owner_id,
        group_id: cli.group_id,
    });

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let engine = DiscoveryEngine::new(
        Arc::new(PgDiscoveryStore::new(pool)),
        Arc::new(UnconfiguredFactory),
        ProxyPool::new("verified_proxies.json"),
        platform,
        tenant,
        ProxyMode::from_caller_value(cli.proxy.as_deref()),
        cli.seed,
        cli.max_posts,
    );

    let report = engine.run_recursive(cli.iterations, cli.max_hashtags).await?;

    info!(
        iterations = report.iterations,
        hashtags_scraped = report.total_hashtags_scraped,
        hashtags_failed = report.total_hashtags_failed,
        posts = report.total_posts_scraped,
        "Discovery finished"
    );

    Ok(())
}
