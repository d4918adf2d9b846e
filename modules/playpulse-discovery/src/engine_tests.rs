//! Engine tests: scripted scrapers and an in-memory store, asserting the
//! unscraped-set math, proxy-rotation retries, and recursion bounds.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use playpulse_common::{Platform, Result, Tenant};

use crate::engine::{
    filter_unscraped, merge_candidates, DiscoveryEngine, HashtagStatus, MAX_ITERATIONS_LIMIT,
    SEED_FREQUENCY,
};
use crate::proxy::{ProxyMode, ProxyPool};
use crate::scraper::{HashtagScraper, ScrapedPost, ScraperFactory};
use crate::store::{DiscoveryStore, HashtagCandidate, UploadStats};

fn candidate(hashtag: &str, frequency: i64) -> HashtagCandidate {
    HashtagCandidate {
        hashtag: hashtag.to_string(),
        frequency,
    }
}

fn post(id: &str) -> ScrapedPost {
    ScrapedPost {
        url: format!("https://www.instagram.com/p/{id}/"),
        username: "studio".to_string(),
        caption: "demo day #indiedev".to_string(),
        likes: "10".to_string(),
        comments_count: "2".to_string(),
        hashtags: vec!["indiedev".to_string()],
        posted_at: None,
        media_urls: Vec::new(),
        source_hashtag: None,
    }
}

// --- In-memory store ---

struct MemoryStore {
    competitor: Vec<HashtagCandidate>,
    from_posts: Vec<HashtagCandidate>,
    scraped: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<(String, usize)>>,
    /// When true, scraped_hashtags never grows, so every pass re-offers the
    /// same candidates.
    forget_scrapes: bool,
}

impl MemoryStore {
    fn new(competitor: Vec<HashtagCandidate>, from_posts: Vec<HashtagCandidate>) -> Self {
        Self {
            competitor,
            from_posts,
            scraped: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
            forget_scrapes: false,
        }
    }
}

#[async_trait]
impl DiscoveryStore for MemoryStore {
    async fn competitor_hashtags(
        &self,
        _platform: Platform,
        _tenant: Option<Tenant>,
        _limit: i64,
    ) -> Result<Vec<HashtagCandidate>> {
        Ok(self.competitor.clone())
    }

    async fn hashtag_post_hashtags(
        &self,
        _platform: Platform,
        _limit: i64,
    ) -> Result<Vec<HashtagCandidate>> {
        Ok(self.from_posts.clone())
    }

    async fn scraped_hashtags(&self, _platform: Platform) -> Result<HashSet<String>> {
        Ok(self.scraped.lock().unwrap().clone())
    }

    async fn store_posts(
        &self,
        _platform: Platform,
        hashtag: &str,
        posts: &[ScrapedPost],
    ) -> Result<UploadStats> {
        if !self.forget_scrapes {
            self.scraped.lock().unwrap().insert(hashtag.to_lowercase());
        }
        self.uploads
            .lock()
            .unwrap()
            .push((hashtag.to_string(), posts.len()));
        Ok(UploadStats {
            uploaded: posts.len(),
            skipped: 0,
        })
    }
}

// --- Scripted scraper/factory ---

#[derive(Clone)]
enum ScrapeStep {
    Posts(usize),
    Empty,
    Fail(&'static str),
}

struct ScriptedScraper {
    script: Arc<Mutex<VecDeque<ScrapeStep>>>,
}

#[async_trait]
impl HashtagScraper for ScriptedScraper {
    async fn scrape_profile(&self, _username: &str, _max: u32) -> anyhow::Result<Vec<ScrapedPost>> {
        Ok(Vec::new())
    }

    async fn scrape_hashtag(&self, _hashtag: &str, _max: u32) -> anyhow::Result<Vec<ScrapedPost>> {
        let step = self.script.lock().unwrap().pop_front().unwrap_or(ScrapeStep::Empty);
        match step {
            ScrapeStep::Posts(n) => Ok((0..n).map(|i| post(&format!("id{i}"))).collect()),
            ScrapeStep::Empty => Ok(Vec::new()),
            ScrapeStep::Fail(msg) => Err(anyhow!(msg)),
        }
    }

    async fn close(&self) {}
}

struct ScriptedFactory {
    script: Arc<Mutex<VecDeque<ScrapeStep>>>,
    creates: AtomicUsize,
}

impl ScriptedFactory {
    fn new(steps: Vec<ScrapeStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(steps.into())),
            creates: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ScraperFactory for ScriptedFactory {
    async fn create(
        &self,
        _platform: Platform,
        _proxy: Option<&str>,
    ) -> anyhow::Result<Box<dyn HashtagScraper>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedScraper {
            script: Arc::clone(&self.script),
        }))
    }
}

fn engine(
    store: Arc<MemoryStore>,
    factory: Arc<ScriptedFactory>,
    platform: Platform,
) -> DiscoveryEngine {
    DiscoveryEngine::new(
        store,
        factory,
        ProxyPool::new("/nonexistent/verified_proxies.json"),
        platform,
        None,
        ProxyMode::Direct,
        Vec::new(),
        50,
    )
}

// --- Pure set math ---

#[test]
fn merge_sums_frequencies_case_folded() {
    let merged = merge_candidates(
        vec![candidate("IndieDev", 5), candidate("pixelart", 2)],
        vec![candidate("indiedev", 3), candidate("gamedev", 4)],
    );
    assert_eq!(merged[0].hashtag, "IndieDev");
    assert_eq!(merged[0].frequency, 8);
    assert_eq!(merged[1].hashtag, "gamedev");
    assert_eq!(merged[2].hashtag, "pixelart");
}

#[test]
fn filter_drops_scraped_and_caps() {
    let scraped: HashSet<String> = ["indiedev".to_string()].into();
    let filtered = filter_unscraped(
        vec![
            candidate("IndieDev", 8),
            candidate("gamedev", 4),
            candidate("pixelart", 2),
            candidate("devlog", 1),
        ],
        &scraped,
        2,
    );
    assert_eq!(filtered.len(), 2);
    assert_eq!(filtered[0].hashtag, "gamedev");
    assert_eq!(filtered[1].hashtag, "pixelart");
}

// --- Engine behavior ---

#[tokio::test(start_paused = true)]
async fn seeds_rank_ahead_of_organic_candidates() {
    let store = Arc::new(MemoryStore::new(vec![candidate("gamedev", 500)], Vec::new()));
    let engine = DiscoveryEngine::new(
        store,
        ScriptedFactory::new(Vec::new()),
        ProxyPool::new("/nonexistent/verified_proxies.json"),
        Platform::Instagram,
        None,
        ProxyMode::Direct,
        vec!["#launchweek".to_string()],
        50,
    );

    let unscraped = engine.unscraped_hashtags(10).await.unwrap();
    assert_eq!(unscraped[0].hashtag, "launchweek");
    assert_eq!(unscraped[0].frequency, SEED_FREQUENCY);
    assert_eq!(unscraped[1].hashtag, "gamedev");
}

#[tokio::test(start_paused = true)]
async fn successful_pass_uploads_and_reports() {
    let store = Arc::new(MemoryStore::new(
        vec![candidate("indiedev", 5), candidate("gamedev", 3)],
        Vec::new(),
    ));
    let factory = ScriptedFactory::new(vec![ScrapeStep::Posts(4), ScrapeStep::Posts(2)]);
    let engine = engine(Arc::clone(&store), factory, Platform::Instagram);

    let report = engine.scrape_new_hashtags(10).await.unwrap();
    assert_eq!(report.hashtags_scraped, 2);
    assert_eq!(report.hashtags_failed, 0);
    assert_eq!(report.total_posts_scraped, 6);

    let uploads = store.uploads.lock().unwrap().clone();
    assert_eq!(uploads, vec![("indiedev".to_string(), 4), ("gamedev".to_string(), 2)]);
}

#[tokio::test(start_paused = true)]
async fn non_proxy_error_fails_hashtag_but_continues() {
    let store = Arc::new(MemoryStore::new(
        vec![candidate("indiedev", 5), candidate("gamedev", 3)],
        Vec::new(),
    ));
    let factory = ScriptedFactory::new(vec![
        ScrapeStep::Fail("element #grid not found"),
        ScrapeStep::Posts(2),
    ]);
    let engine = engine(Arc::clone(&store), factory, Platform::Instagram);

    let report = engine.scrape_new_hashtags(10).await.unwrap();
    assert_eq!(report.hashtags_failed, 1);
    assert_eq!(report.hashtags_scraped, 1);
    assert!(matches!(report.details[0].status, HashtagStatus::Error(_)));
    assert_eq!(report.details[1].status, HashtagStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn tiktok_rotates_proxies_on_classified_failures() {
    let store = Arc::new(MemoryStore::new(vec![candidate("fyp", 5)], Vec::new()));
    let factory = ScriptedFactory::new(vec![
        ScrapeStep::Fail("net::ERR_TIMED_OUT"),
        ScrapeStep::Empty,
        ScrapeStep::Posts(3),
    ]);
    let engine = engine(Arc::clone(&store), Arc::clone(&factory), Platform::TikTok);

    let report = engine.scrape_new_hashtags(10).await.unwrap();
    assert_eq!(report.hashtags_scraped, 1);
    assert_eq!(report.total_posts_scraped, 3);
    // Initial scraper + two rotations.
    assert_eq!(factory.creates.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn tiktok_gives_up_after_attempt_budget() {
    let store = Arc::new(MemoryStore::new(vec![candidate("fyp", 5)], Vec::new()));
    // Script is empty, so every attempt returns Empty.
    let factory = ScriptedFactory::new(Vec::new());
    let engine = engine(Arc::clone(&store), Arc::clone(&factory), Platform::TikTok);

    let report = engine.scrape_new_hashtags(10).await.unwrap();
    assert_eq!(report.hashtags_scraped, 0);
    assert_eq!(report.hashtags_failed, 1);
    assert_eq!(report.details[0].status, HashtagStatus::NoPosts);
    // Initial scraper + 24 rotations (the final attempt does not rotate).
    assert_eq!(factory.creates.load(Ordering::SeqCst) as u32, 25);
}

#[tokio::test(start_paused = true)]
async fn tiktok_non_proxy_error_aborts_hashtag() {
    let store = Arc::new(MemoryStore::new(vec![candidate("fyp", 5)], Vec::new()));
    let factory = ScriptedFactory::new(vec![ScrapeStep::Fail("hashtag page layout changed")]);
    let engine = engine(Arc::clone(&store), Arc::clone(&factory), Platform::TikTok);

    let report = engine.scrape_new_hashtags(10).await.unwrap();
    assert_eq!(report.hashtags_failed, 1);
    assert!(matches!(report.details[0].status, HashtagStatus::Error(_)));
    assert_eq!(factory.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recursion_stops_when_an_iteration_produces_nothing() {
    let store = Arc::new(MemoryStore::new(vec![candidate("indiedev", 5)], Vec::new()));
    let factory = ScriptedFactory::new(vec![ScrapeStep::Posts(2)]);
    let engine = engine(Arc::clone(&store), factory, Platform::Instagram);

    let report = engine.run_recursive(5, 10).await.unwrap();
    // Iteration 1 scrapes the tag; iteration 2 finds nothing and stops.
    assert_eq!(report.iterations, 2);
    assert_eq!(report.total_hashtags_scraped, 1);
    assert_eq!(report.total_posts_scraped, 2);
}

#[tokio::test(start_paused = true)]
async fn recursion_is_hard_capped() {
    let mut store = MemoryStore::new(vec![candidate("indiedev", 5)], Vec::new());
    store.forget_scrapes = true;
    let store = Arc::new(store);
    let factory = ScriptedFactory::new(
        (0..MAX_ITERATIONS_LIMIT).map(|_| ScrapeStep::Posts(1)).collect(),
    );
    let engine = engine(Arc::clone(&store), factory, Platform::Instagram);

    let report = engine.run_recursive(99, 10).await.unwrap();
    assert_eq!(report.iterations, MAX_ITERATIONS_LIMIT);
    assert_eq!(report.total_hashtags_scraped, MAX_ITERATIONS_LIMIT as usize);
}
