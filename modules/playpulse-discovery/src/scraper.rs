//! Scraper seams for hashtag discovery. The browser-automation drivers
//! themselves live outside this crate; the engine depends only on these
//! traits plus the failure classifiers below.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use playpulse_common::Platform;

/// A post captured from a hashtag or profile page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPost {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub likes: String,
    #[serde(default)]
    pub comments_count: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    /// The hashtag this post was found under, when known.
    #[serde(default)]
    pub source_hashtag: Option<String>,
}

/// Platform scraper contract. One instance holds one browser session and
/// (optionally) one proxy; rotation means dropping the instance and asking
/// the factory for a new one.
#[async_trait]
pub trait HashtagScraper: Send + Sync {
    async fn scrape_profile(&self, username: &str, max_posts: u32) -> Result<Vec<ScrapedPost>>;

    async fn scrape_hashtag(&self, hashtag: &str, max_posts: u32) -> Result<Vec<ScrapedPost>>;

    /// Per-video detail scrape. Platforms without one keep the default.
    async fn scrape_video(&self, _url: &str) -> Result<Option<ScrapedPost>> {
        Ok(None)
    }

    /// Release the underlying browser session.
    async fn close(&self);
}

/// Builds scrapers for a platform, optionally routed through a proxy.
#[async_trait]
pub trait ScraperFactory: Send + Sync {
    async fn create(
        &self,
        platform: Platform,
        proxy: Option<&str>,
    ) -> Result<Box<dyn HashtagScraper>>;
}

/// Error-text fragments that mean the proxy (not the target) failed.
/// Drawn from observed in-the-wild failures; expect churn.
pub const PROXY_FAILURE_TOKENS: &[&str] = &[
    "timeout",
    "timed_out",
    "err_timed_out",
    "err_aborted",
    "context was destroyed",
    "navigation",
    "net::err_",
    "connection refused",
    "connection reset",
    "proxy",
    "properties of null",
    "scrollheight",
    "typeerror",
    "something went wrong",
];

/// Classify a scrape error: true when rotating to a new proxy is worth a
/// retry, false when the error would reproduce on any route.
pub fn is_proxy_failure(error_text: &str) -> bool {
    let lowered = error_text.to_lowercase();
    PROXY_FAILURE_TOKENS.iter().any(|token| lowered.contains(token))
}

const BOT_INDICATORS: &[&str] = &[
    "captcha",
    "challenge",
    "verify you are human",
    "unusual traffic",
    "automated access",
    "rate limit",
    "too many requests",
    "blocked",
    "access denied",
];

/// Check page text (or a URL) for bot-detection tells.
pub fn is_bot_detected(page_text: &str) -> bool {
    let lowered = page_text.to_lowercase();
    BOT_INDICATORS.iter().any(|indicator| lowered.contains(indicator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_tiktok_error_page_are_proxy_failures() {
        assert!(is_proxy_failure("net::ERR_TIMED_OUT while navigating"));
        assert!(is_proxy_failure("Execution context was destroyed"));
        assert!(is_proxy_failure("Something went wrong. Try again."));
        assert!(is_proxy_failure("Cannot read properties of null (reading 'scrollHeight')"));
    }

    #[test]
    fn real_errors_are_not_proxy_failures() {
        assert!(!is_proxy_failure("element #login-form not found"));
        assert!(!is_proxy_failure("invalid hashtag name"));
    }

    #[test]
    fn bot_detection_matches_indicator_text() {
        assert!(is_bot_detected("Please complete the CAPTCHA to continue"));
        assert!(is_bot_detected("We detected unusual traffic from your network"));
        assert!(!is_bot_detected("40 posts under #indiedev"));
    }
}
