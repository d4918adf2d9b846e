//! Postgres access for hashtag discovery: candidate queries over competitor
//! and hashtag posts, plus persistence of freshly scraped posts.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;

use playpulse_common::{Platform, Result, Tenant};

use crate::scraper::ScrapedPost;
use crate::uploader::{caption_hash, extract_post_id, parse_count, username_from_url};

/// A hashtag candidate with how often it appeared in its source set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashtagCandidate {
    pub hashtag: String,
    pub frequency: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UploadStats {
    pub uploaded: usize,
    pub skipped: usize,
}

/// Store seam the discovery engine depends on; the Postgres implementation
/// below is the production one, tests substitute in-memory fakes.
#[async_trait]
pub trait DiscoveryStore: Send + Sync {
    /// Hashtags seen in tracked competitors' posts over the last 28 days.
    async fn competitor_hashtags(
        &self,
        platform: Platform,
        tenant: Option<Tenant>,
        limit: i64,
    ) -> Result<Vec<HashtagCandidate>>;

    /// Hashtags seen in already-scraped hashtag posts over the last 28
    /// days. This is what makes discovery recursive.
    async fn hashtag_post_hashtags(
        &self,
        platform: Platform,
        limit: i64,
    ) -> Result<Vec<HashtagCandidate>>;

    /// Case-folded set of hashtags already scraped for a platform.
    async fn scraped_hashtags(&self, platform: Platform) -> Result<HashSet<String>>;

    /// Persist one hashtag's scrape results.
    async fn store_posts(
        &self,
        platform: Platform,
        hashtag: &str,
        posts: &[ScrapedPost],
    ) -> Result<UploadStats>;
}

#[derive(Clone)]
pub struct PgDiscoveryStore {
    pool: PgPool,
}

impl PgDiscoveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DiscoveryStore for PgDiscoveryStore {
    async fn competitor_hashtags(
        &self,
        platform: Platform,
        tenant: Option<Tenant>,
        limit: i64,
    ) -> Result<Vec<HashtagCandidate>> {
        let rows: Vec<(String, i64)> = match tenant {
            Some(tenant) => {
                sqlx::query_as(
                    r#"
                    SELECT hashtag, COUNT(*)::bigint AS frequency
                    FROM (
                        SELECT UNNEST(cp.hashtags) AS hashtag
                        FROM competitor_posts cp
                        JOIN user_competitors uc ON uc.competitor_id = cp.competitor_id
                        WHERE uc.user_id = $1
                          AND (uc.group_id = $2 OR uc.group_id IS NULL)
                          AND cp.posted_at >= NOW() - INTERVAL '28 days'
                          AND cp.platform = $3
                          AND cp.hashtags IS NOT NULL
                          AND array_length(cp.hashtags, 1) > 0
                    ) AS tags
                    WHERE LENGTH(hashtag) > 2
                    GROUP BY hashtag
                    ORDER BY frequency DESC
                    LIMIT $4
                    "#,
                )
                .bind(tenant.owner_id)
                .bind(tenant.group_id)
                .bind(platform.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT hashtag, COUNT(*)::bigint AS frequency
                    FROM (
                        SELECT UNNEST(cp.hashtags) AS hashtag
                        FROM competitor_posts cp
                        WHERE cp.posted_at >= NOW() - INTERVAL '28 days'
                          AND cp.platform = $1
                          AND cp.hashtags IS NOT NULL
                          AND array_length(cp.hashtags, 1) > 0
                    ) AS tags
                    WHERE LENGTH(hashtag) > 2
                    GROUP BY hashtag
                    ORDER BY frequency DESC
                    LIMIT $2
                    "#,
                )
                .bind(platform.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|(hashtag, frequency)| HashtagCandidate { hashtag, frequency })
            .collect())
    }

    async fn hashtag_post_hashtags(
        &self,
        platform: Platform,
        limit: i64,
    ) -> Result<Vec<HashtagCandidate>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT hashtag, COUNT(*)::bigint AS frequency
            FROM (
                SELECT UNNEST(hp.hashtags) AS hashtag
                FROM hashtag_posts hp
                WHERE hp.posted_at >= NOW() - INTERVAL '28 days'
                  AND hp.platform = $1
                  AND hp.hashtags IS NOT NULL
                  AND array_length(hp.hashtags, 1) > 0
            ) AS tags
            WHERE LENGTH(hashtag) > 2
            GROUP BY hashtag
            ORDER BY frequency DESC
            LIMIT $2
            "#,
        )
        .bind(platform.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(hashtag, frequency)| HashtagCandidate { hashtag, frequency })
            .collect())
    }

    async fn scraped_hashtags(&self, platform: Platform) -> Result<HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT hashtag FROM hashtag_posts WHERE platform = $1")
                .bind(platform.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|h| h.to_lowercase()).collect())
    }

    async fn store_posts(
        &self,
        platform: Platform,
        hashtag: &str,
        posts: &[ScrapedPost],
    ) -> Result<UploadStats> {
        let mut stats = UploadStats::default();

        for post in posts {
            let Some(post_id) = extract_post_id(&post.url) else {
                warn!(url = %post.url, "Could not extract post id, skipping");
                stats.skipped += 1;
                continue;
            };

            let username = if post.username.is_empty() {
                username_from_url(&post.url).unwrap_or_default().to_string()
            } else {
                post.username.clone()
            };

            let likes = parse_count(&post.likes);
            let comments_count = parse_count(&post.comments_count);
            let media = serde_json::json!({
                "urls": post.media_urls,
                "type": if post.media_urls.is_empty() { "unknown" } else { "image" },
            });
            let post_hashtag = post.source_hashtag.as_deref().unwrap_or(hashtag);

            let result = sqlx::query(
                r#"
                INSERT INTO hashtag_posts (
                    hashtag, platform, post_id, username, content, media,
                    posted_at, likes, comments_count, hashtags, scraped_at, caption_hash
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (platform, post_id) DO UPDATE SET
                    hashtag = EXCLUDED.hashtag,
                    username = EXCLUDED.username,
                    content = EXCLUDED.content,
                    media = EXCLUDED.media,
                    posted_at = EXCLUDED.posted_at,
                    likes = EXCLUDED.likes,
                    comments_count = EXCLUDED.comments_count,
                    hashtags = EXCLUDED.hashtags,
                    scraped_at = EXCLUDED.scraped_at
                "#,
            )
            .bind(post_hashtag)
            .bind(platform.as_str())
            .bind(post_id)
            .bind(&username)
            .bind(&post.caption)
            .bind(&media)
            .bind(post.posted_at)
            .bind(likes)
            .bind(comments_count)
            .bind(&post.hashtags)
            .bind(Utc::now())
            .bind(caption_hash(&post.caption))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => stats.uploaded += 1,
                Err(e) => {
                    warn!(url = %post.url, error = %e, "Failed to store post");
                    stats.skipped += 1;
                }
            }
        }

        Ok(stats)
    }
}
