//! Reddit fetcher over the public .json endpoints. No authentication: just
//! a browser-like User-Agent, polite spacing between requests, and
//! exponential backoff on 429s and transport errors.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use playpulse_common::{FetchedComment, FetchedPost};

// Reddit blocks requests without a descriptive User-Agent.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The fetcher-adapter contract the scheduler depends on. The Reddit
/// implementation below is the production one; tests substitute mocks.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Newest-first posts from a subreddit's /new listing, stopping at
    /// `last_seen_utc` when given.
    async fn fetch_subreddit_new(
        &self,
        subreddit: &str,
        limit: u32,
        last_seen_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedPost>>;

    /// Newest-first search results, optionally restricted to a subreddit.
    async fn fetch_search(
        &self,
        query: &str,
        subreddit: Option<&str>,
        limit: u32,
        last_seen_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedPost>>;

    /// Top comments for a submission, bounded by count and tree depth.
    async fn fetch_comments(
        &self,
        submission_external_id: &str,
        limit: u32,
        depth: u32,
    ) -> Result<Vec<FetchedComment>>;
}

pub struct RedditClient {
    http: reqwest::Client,
    last_request: Mutex<Option<Instant>>,
}

impl RedditClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            last_request: Mutex::new(None),
        }
    }

    /// Enforce the minimum spacing between requests, with a little jitter so
    /// the cadence doesn't look mechanical.
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < BASE_DELAY {
                let jitter = Duration::from_millis(rand::rng().random_range(100..500));
                tokio::time::sleep(BASE_DELAY - elapsed + jitter).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// GET with exponential backoff on 429 and transport errors. Returns
    /// None when retries are exhausted or the endpoint refuses us (403),
    /// which ends pagination without failing the whole pass.
    async fn request_with_backoff(&self, url: &str, params: &[(&str, String)]) -> Option<Value> {
        for attempt in 1..=MAX_RETRIES {
            self.rate_limit().await;

            let result = self.http.get(url).query(params).send().await;

            match result {
                Ok(response) => match response.status() {
                    StatusCode::OK => match response.json::<Value>().await {
                        Ok(body) => return Some(body),
                        Err(e) => {
                            warn!(url, error = %e, "Failed to decode Reddit response");
                            return None;
                        }
                    },
                    StatusCode::TOO_MANY_REQUESTS => {
                        let delay = backoff_delay(attempt);
                        warn!(
                            url,
                            attempt,
                            delay_secs = delay.as_secs(),
                            "Rate limited (429), backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    StatusCode::FORBIDDEN => {
                        error!(url, "Forbidden (403), Reddit may be blocking requests");
                        return None;
                    }
                    status => {
                        error!(url, status = %status, "Unexpected HTTP status");
                        return None;
                    }
                },
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        url,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Request error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!(url, "Max retries exceeded");
        None
    }

    async fn fetch_listing(
        &self,
        url: &str,
        base_params: Vec<(&str, String)>,
        limit: u32,
        last_seen_utc: Option<DateTime<Utc>>,
    ) -> Vec<FetchedPost> {
        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        while (posts.len() as u32) < limit {
            let mut params = base_params.clone();
            let remaining = limit - posts.len() as u32;
            params.push(("limit", remaining.min(100).to_string()));
            if let Some(ref cursor) = after {
                params.push(("after", cursor.clone()));
            }

            let Some(data) = self.request_with_backoff(url, &params).await else {
                break;
            };

            let children = data["data"]["children"].as_array().cloned().unwrap_or_default();
            if children.is_empty() {
                break;
            }

            for child in &children {
                if child["kind"].as_str() != Some("t3") {
                    continue;
                }
                let Some(post) = parse_post(&child["data"]) else {
                    continue;
                };

                // Stop when we reach already-seen territory.
                if let Some(last_seen) = last_seen_utc {
                    if post.created_utc <= last_seen {
                        debug!(created_utc = %post.created_utc, "Reached already-seen post");
                        return posts;
                    }
                }

                posts.push(post);
                if posts.len() as u32 >= limit {
                    break;
                }
            }

            after = data["data"]["after"].as_str().map(String::from);
            if after.is_none() {
                break;
            }
        }

        posts
    }
}

impl Default for RedditClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for RedditClient {
    async fn fetch_subreddit_new(
        &self,
        subreddit: &str,
        limit: u32,
        last_seen_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedPost>> {
        let url = format!("https://www.reddit.com/r/{subreddit}/new.json");
        Ok(self.fetch_listing(&url, Vec::new(), limit, last_seen_utc).await)
    }

    async fn fetch_search(
        &self,
        query: &str,
        subreddit: Option<&str>,
        limit: u32,
        last_seen_utc: Option<DateTime<Utc>>,
    ) -> Result<Vec<FetchedPost>> {
        let (url, params) = match subreddit {
            Some(sub) => (
                format!("https://www.reddit.com/r/{sub}/search.json"),
                vec![
                    ("q", query.to_string()),
                    ("restrict_sr", "on".to_string()),
                    ("sort", "new".to_string()),
                ],
            ),
            None => (
                "https://www.reddit.com/search.json".to_string(),
                vec![("q", query.to_string()), ("sort", "new".to_string())],
            ),
        };
        Ok(self.fetch_listing(&url, params, limit, last_seen_utc).await)
    }

    async fn fetch_comments(
        &self,
        submission_external_id: &str,
        limit: u32,
        depth: u32,
    ) -> Result<Vec<FetchedComment>> {
        let clean_id = submission_external_id.trim_start_matches("t3_");
        let url = format!("https://www.reddit.com/comments/{clean_id}.json");
        let params = vec![
            ("limit", limit.to_string()),
            ("depth", depth.to_string()),
            ("sort", "top".to_string()),
        ];

        let Some(data) = self.request_with_backoff(&url, &params).await else {
            return Ok(Vec::new());
        };

        // Response is [post listing, comment listing].
        let Some(comment_children) = data
            .get(1)
            .and_then(|listing| listing["data"]["children"].as_array())
        else {
            return Ok(Vec::new());
        };

        let mut comments = Vec::new();
        for child in comment_children {
            if child["kind"].as_str() != Some("t1") {
                continue;
            }
            let body = child["data"]["body"].as_str().unwrap_or_default();
            if body == "[removed]" || body == "[deleted]" {
                continue;
            }
            if let Some(comment) = parse_comment(&child["data"]) {
                comments.push(comment);
                if comments.len() as u32 >= limit {
                    break;
                }
            }
        }

        Ok(comments)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(MAX_DELAY.as_secs_f64());
    let jitter = rand::rng().random_range(0.0..capped * 0.1);
    Duration::from_secs_f64(capped + jitter)
}

/// Convert a raw Reddit post object into the standard fetch record.
fn parse_post(data: &Value) -> Option<FetchedPost> {
    let id = data["id"].as_str()?;
    let created = timestamp(&data["created_utc"])?;
    Some(FetchedPost {
        external_id: format!("t3_{id}"),
        external_url: format!(
            "https://reddit.com{}",
            data["permalink"].as_str().unwrap_or_default()
        ),
        subreddit: data["subreddit"].as_str().unwrap_or_default().to_string(),
        title: data["title"].as_str().unwrap_or_default().to_string(),
        body: data["selftext"].as_str().unwrap_or_default().to_string(),
        author: data["author"].as_str().unwrap_or("[deleted]").to_string(),
        author_flair: data["author_flair_text"].as_str().map(String::from),
        score: data["score"].as_i64().unwrap_or(0),
        num_comments: data["num_comments"].as_i64().unwrap_or(0),
        created_utc: created,
        nsfw: data["over_18"].as_bool().unwrap_or(false),
        removed: !data["removed_by_category"].is_null(),
        raw_json: data.clone(),
    })
}

fn parse_comment(data: &Value) -> Option<FetchedComment> {
    let id = data["id"].as_str()?;
    let created = timestamp(&data["created_utc"])?;
    let body = data["body"].as_str().unwrap_or_default();
    Some(FetchedComment {
        external_id: format!("t1_{id}"),
        parent_external_id: data["parent_id"].as_str().map(String::from),
        body: body.to_string(),
        author: data["author"].as_str().unwrap_or("[deleted]").to_string(),
        author_flair: data["author_flair_text"].as_str().map(String::from),
        score: data["score"].as_i64().unwrap_or(0),
        created_utc: created,
        removed: body == "[removed]" || body == "[deleted]",
        raw_json: data.clone(),
    })
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = value.as_f64()?;
    DateTime::from_timestamp(secs as i64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_post_maps_reddit_fields() {
        let data = json!({
            "id": "abc",
            "permalink": "/r/gamedev/comments/abc/launch_tips/",
            "subreddit": "gamedev",
            "title": "Launch tips",
            "selftext": "Use wishlists.",
            "author": "u1",
            "author_flair_text": "Dev",
            "score": 50,
            "num_comments": 12,
            "created_utc": 1_750_000_000.0,
            "over_18": false,
            "removed_by_category": null,
        });
        let post = parse_post(&data).unwrap();
        assert_eq!(post.external_id, "t3_abc");
        assert_eq!(
            post.external_url,
            "https://reddit.com/r/gamedev/comments/abc/launch_tips/"
        );
        assert_eq!(post.score, 50);
        assert_eq!(post.author_flair.as_deref(), Some("Dev"));
        assert!(!post.removed);
    }

    #[test]
    fn parse_post_flags_removed_category() {
        let data = json!({
            "id": "abc",
            "created_utc": 1_750_000_000.0,
            "removed_by_category": "moderator",
        });
        assert!(parse_post(&data).unwrap().removed);
    }

    #[test]
    fn parse_post_requires_id_and_timestamp() {
        assert!(parse_post(&json!({"created_utc": 1.0})).is_none());
        assert!(parse_post(&json!({"id": "abc"})).is_none());
    }

    #[test]
    fn parse_comment_marks_removed_bodies() {
        let data = json!({
            "id": "c1",
            "parent_id": "t3_abc",
            "body": "[removed]",
            "author": "u2",
            "score": 3,
            "created_utc": 1_750_000_000.0,
        });
        let comment = parse_comment(&data).unwrap();
        assert!(comment.removed);
        assert_eq!(comment.external_id, "t1_c1");
        assert_eq!(comment.parent_external_id.as_deref(), Some("t3_abc"));
    }

    #[test]
    fn missing_author_defaults_to_deleted() {
        let data = json!({"id": "abc", "created_utc": 1_750_000_000.0});
        assert_eq!(parse_post(&data).unwrap().author, "[deleted]");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(1);
        let last = backoff_delay(10);
        assert!(first >= Duration::from_secs(4));
        assert!(last <= Duration::from_secs(66)); // cap + 10% jitter
    }
}
