//! Hashtag discovery: grow the set of scraped hashtags by drawing
//! candidates from competitor posts and previously scraped hashtag posts,
//! scraping the ones not seen yet, and repeating until the graph runs dry
//! or the iteration cap is hit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use playpulse_common::{Platform, PulseError, Result, Tenant};

use crate::proxy::{ProxyMode, ProxyPool};
use crate::scraper::{is_proxy_failure, HashtagScraper, ScrapedPost, ScraperFactory};
use crate::store::{DiscoveryStore, HashtagCandidate};

/// Hard cap on recursive iterations. Requests above this are clamped, not
/// rejected.
pub const MAX_ITERATIONS_LIMIT: u32 = 10;

/// Artificial frequency for caller-provided seed hashtags so they sort
/// ahead of every organic candidate.
pub const SEED_FREQUENCY: i64 = 999;

const INIT_ATTEMPTS: u32 = 3;
const TIKTOK_SCRAPE_ATTEMPTS: u32 = 25;
const HASHTAG_PAUSE: Duration = Duration::from_secs(5);
const ITERATION_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashtagStatus {
    Success,
    NoPosts,
    UploadFailed,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct HashtagOutcome {
    pub hashtag: String,
    pub status: HashtagStatus,
    pub posts: usize,
}

#[derive(Debug, Default, Clone)]
pub struct DiscoveryReport {
    pub hashtags_scraped: usize,
    pub hashtags_failed: usize,
    pub total_posts_scraped: usize,
    pub details: Vec<HashtagOutcome>,
}

#[derive(Debug, Default, Clone)]
pub struct RecursiveReport {
    pub iterations: u32,
    pub total_hashtags_scraped: usize,
    pub total_hashtags_failed: usize,
    pub total_posts_scraped: usize,
    pub iteration_reports: Vec<DiscoveryReport>,
}

pub struct DiscoveryEngine {
    store: Arc<dyn DiscoveryStore>,
    factory: Arc<dyn ScraperFactory>,
    proxy_pool: ProxyPool,
    platform: Platform,
    tenant: Option<Tenant>,
    proxy_mode: ProxyMode,
    seed_hashtags: Vec<String>,
    max_posts_per_hashtag: u32,
}

impl DiscoveryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DiscoveryStore>,
        factory: Arc<dyn ScraperFactory>,
        proxy_pool: ProxyPool,
        platform: Platform,
        tenant: Option<Tenant>,
        proxy_mode: ProxyMode,
        seed_hashtags: Vec<String>,
        max_posts_per_hashtag: u32,
    ) -> Self {
        Self {
            store,
            factory,
            proxy_pool,
            platform,
            tenant,
            proxy_mode,
            seed_hashtags,
            max_posts_per_hashtag,
        }
    }

    /// Candidate hashtags not yet scraped for this platform, highest
    /// combined frequency first.
    pub async fn unscraped_hashtags(&self, limit: usize) -> Result<Vec<HashtagCandidate>> {
        let fetch_limit = (limit * 2) as i64;

        let competitor = self
            .store
            .competitor_hashtags(self.platform, self.tenant, fetch_limit)
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to fetch competitor hashtags");
                Vec::new()
            });

        let mut from_posts: Vec<HashtagCandidate> = self
            .seed_hashtags
            .iter()
            .map(|tag| HashtagCandidate {
                hashtag: tag.trim_start_matches('#').to_string(),
                frequency: SEED_FREQUENCY,
            })
            .collect();
        match self.store.hashtag_post_hashtags(self.platform, fetch_limit).await {
            Ok(candidates) => from_posts.extend(candidates),
            Err(e) => error!(error = %e, "Failed to fetch hashtag-post hashtags"),
        }

        let merged = merge_candidates(competitor, from_posts);
        let scraped = self.store.scraped_hashtags(self.platform).await?;
        let unscraped = filter_unscraped(merged, &scraped, limit);

        info!(count = unscraped.len(), platform = %self.platform, "Unscraped hashtags selected");
        Ok(unscraped)
    }

    /// One discovery pass: compute the unscraped set and scrape each tag.
    pub async fn scrape_new_hashtags(&self, max_hashtags: usize) -> Result<DiscoveryReport> {
        info!(platform = %self.platform, "Starting hashtag discovery pass");

        let unscraped = self.unscraped_hashtags(max_hashtags).await?;
        if unscraped.is_empty() {
            info!("No new hashtags to scrape");
            return Ok(DiscoveryReport::default());
        }

        let mut scraper = self.init_scraper().await?;
        let mut report = DiscoveryReport::default();

        for (idx, candidate) in unscraped.iter().enumerate() {
            let hashtag = &candidate.hashtag;
            info!(hashtag, frequency = candidate.frequency, "Scraping hashtag");

            let outcome = match self.scrape_one(&mut scraper, hashtag).await {
                Ok(posts) if posts.is_empty() => {
                    warn!(hashtag, "No posts found");
                    HashtagOutcome {
                        hashtag: hashtag.clone(),
                        status: HashtagStatus::NoPosts,
                        posts: 0,
                    }
                }
                Ok(posts) => match self.store.store_posts(self.platform, hashtag, &posts).await {
                    Ok(stats) if stats.uploaded > 0 => {
                        info!(hashtag, posts = posts.len(), uploaded = stats.uploaded, "Hashtag stored");
                        HashtagOutcome {
                            hashtag: hashtag.clone(),
                            status: HashtagStatus::Success,
                            posts: posts.len(),
                        }
                    }
                    Ok(_) => HashtagOutcome {
                        hashtag: hashtag.clone(),
                        status: HashtagStatus::UploadFailed,
                        posts: posts.len(),
                    },
                    Err(e) => {
                        error!(hashtag, error = %e, "Upload failed");
                        HashtagOutcome {
                            hashtag: hashtag.clone(),
                            status: HashtagStatus::UploadFailed,
                            posts: posts.len(),
                        }
                    }
                },
                Err(e) => {
                    error!(hashtag, error = %e, "Hashtag scrape failed");
                    HashtagOutcome {
                        hashtag: hashtag.clone(),
                        status: HashtagStatus::Error(e.to_string()),
                        posts: 0,
                    }
                }
            };

            match outcome.status {
                HashtagStatus::Success => {
                    report.hashtags_scraped += 1;
                    report.total_posts_scraped += outcome.posts;
                }
                _ => report.hashtags_failed += 1,
            }
            report.details.push(outcome);

            if idx + 1 < unscraped.len() {
                tokio::time::sleep(HASHTAG_PAUSE).await;
            }
        }

        scraper.close().await;

        info!(
            scraped = report.hashtags_scraped,
            failed = report.hashtags_failed,
            posts = report.total_posts_scraped,
            "Hashtag discovery pass complete"
        );
        Ok(report)
    }

    /// Recursive discovery: repeat passes until nothing new turns up or the
    /// (hard-capped) iteration budget runs out, pausing between rounds.
    pub async fn run_recursive(
        &self,
        max_iterations: u32,
        max_hashtags_per_iteration: usize,
    ) -> Result<RecursiveReport> {
        let max_iterations = if max_iterations > MAX_ITERATIONS_LIMIT {
            warn!(
                requested = max_iterations,
                cap = MAX_ITERATIONS_LIMIT,
                "Requested iterations exceed the hard limit, clamping"
            );
            MAX_ITERATIONS_LIMIT
        } else {
            max_iterations
        };

        info!(platform = %self.platform, max_iterations, "Starting recursive hashtag discovery");

        let mut report = RecursiveReport::default();

        for iteration in 1..=max_iterations {
            info!(iteration, max_iterations, "Discovery iteration");

            let pass = self.scrape_new_hashtags(max_hashtags_per_iteration).await?;
            report.iterations = iteration;
            report.total_hashtags_scraped += pass.hashtags_scraped;
            report.total_hashtags_failed += pass.hashtags_failed;
            report.total_posts_scraped += pass.total_posts_scraped;

            let produced = pass.hashtags_scraped;
            report.iteration_reports.push(pass);

            if produced == 0 {
                info!(iteration, "No new hashtags this iteration, stopping");
                break;
            }

            if iteration < max_iterations {
                tokio::time::sleep(ITERATION_PAUSE).await;
            }
        }

        info!(
            iterations = report.iterations,
            scraped = report.total_hashtags_scraped,
            failed = report.total_hashtags_failed,
            posts = report.total_posts_scraped,
            "Recursive hashtag discovery complete"
        );
        Ok(report)
    }

    /// Build the platform scraper, retrying with a fresh proxy on each
    /// failed attempt.
    async fn init_scraper(&self) -> Result<Box<dyn HashtagScraper>> {
        let mut proxy = self.select_proxy(true).await;

        for attempt in 1..=INIT_ATTEMPTS {
            match self.factory.create(self.platform, proxy.as_deref()).await {
                Ok(scraper) => return Ok(scraper),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = INIT_ATTEMPTS,
                        error = %e,
                        "Scraper init failed"
                    );
                    if attempt == INIT_ATTEMPTS {
                        return Err(PulseError::Scraping(format!(
                            "scraper init failed after {INIT_ATTEMPTS} attempts: {e}"
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    proxy = self.select_proxy(false).await;
                }
            }
        }

        unreachable!("init loop always returns")
    }

    /// Scrape one hashtag. TikTok gets the long proxy-rotation loop; other
    /// platforms fail straight through to the per-hashtag handler.
    async fn scrape_one(
        &self,
        scraper: &mut Box<dyn HashtagScraper>,
        hashtag: &str,
    ) -> Result<Vec<ScrapedPost>> {
        if self.platform != Platform::TikTok {
            return scraper
                .scrape_hashtag(hashtag, self.max_posts_per_hashtag)
                .await
                .map_err(|e| PulseError::Scraping(e.to_string()));
        }

        // Free proxies have a low success rate against TikTok: empty pages
        // and classified transport errors both mean "rotate and try again".
        for attempt in 1..=TIKTOK_SCRAPE_ATTEMPTS {
            match scraper.scrape_hashtag(hashtag, self.max_posts_per_hashtag).await {
                Ok(posts) if !posts.is_empty() => return Ok(posts),
                Ok(_) => {
                    warn!(
                        hashtag,
                        attempt,
                        max_attempts = TIKTOK_SCRAPE_ATTEMPTS,
                        "Scrape returned no results, rotating proxy"
                    );
                }
                Err(e) if is_proxy_failure(&e.to_string()) => {
                    warn!(
                        hashtag,
                        attempt,
                        max_attempts = TIKTOK_SCRAPE_ATTEMPTS,
                        error = %e,
                        "Proxy failure detected, rotating proxy"
                    );
                }
                Err(e) => return Err(PulseError::Scraping(e.to_string())),
            }

            if attempt == TIKTOK_SCRAPE_ATTEMPTS {
                break;
            }

            scraper.close().await;
            let proxy = self.select_proxy(false).await;
            *scraper = self
                .factory
                .create(self.platform, proxy.as_deref())
                .await
                .map_err(|e| PulseError::Scraping(e.to_string()))?;
        }

        Ok(Vec::new())
    }

    /// Resolve a proxy for the current mode. The first selection may
    /// trigger a full validation pass when the pool is empty; rotations
    /// just draw from whatever is verified.
    async fn select_proxy(&self, allow_validation: bool) -> Option<String> {
        match &self.proxy_mode {
            ProxyMode::Direct => None,
            ProxyMode::Explicit(url) => Some(url.clone()),
            ProxyMode::Auto => {
                if let Some(proxy) = self.proxy_pool.get_working_proxy() {
                    return Some(proxy);
                }
                if allow_validation {
                    info!("No verified proxies, running a validation pass");
                    if let Err(e) = self.proxy_pool.validate_all_proxies().await {
                        warn!(error = %e, "Proxy validation failed");
                    }
                    return self.proxy_pool.get_working_proxy();
                }
                None
            }
        }
    }
}

/// Union two candidate sets, summing frequencies on the case-folded
/// hashtag. The first-seen casing wins for display.
pub fn merge_candidates(
    first: Vec<HashtagCandidate>,
    second: Vec<HashtagCandidate>,
) -> Vec<HashtagCandidate> {
    let mut by_key: HashMap<String, HashtagCandidate> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for candidate in first.into_iter().chain(second) {
        let key = candidate.hashtag.to_lowercase();
        match by_key.get_mut(&key) {
            Some(existing) => existing.frequency += candidate.frequency,
            None => {
                order.push(key.clone());
                by_key.insert(key, candidate);
            }
        }
    }

    let mut merged: Vec<HashtagCandidate> =
        order.into_iter().filter_map(|key| by_key.remove(&key)).collect();
    merged.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    merged
}

/// Drop already-scraped hashtags (case-folded) and keep the top `limit`.
pub fn filter_unscraped(
    candidates: Vec<HashtagCandidate>,
    scraped: &HashSet<String>,
    limit: usize,
) -> Vec<HashtagCandidate> {
    candidates
        .into_iter()
        .filter(|c| !scraped.contains(&c.hashtag.to_lowercase()))
        .take(limit)
        .collect()
}
