//! Viral outlier detection over the unified_posts view. A post is an
//! outlier when it clears the engagement-multiplier tier against its
//! account's rolling median AND enough of its individual metrics agree,
//! with availability-aware rules for accounts where views are missing.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info};

use playpulse_common::{Result, ViralConfig};

use crate::lock::{TaskLockStore, VIRAL_SCANNER_LOCK};

/// A detected outlier, as selected by the detection query.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ViralOutlier {
    pub source_table: String,
    pub source_id: i64,
    pub username: String,
    pub platform: String,
    pub content: String,
    pub hook: String,
    pub multiplier: i32,
    pub median_engagement: i64,
    pub actual_engagement: i64,
    pub available_count: i32,
    pub support_count: i32,
    pub likes: i64,
    pub comments: i64,
    pub views: Option<i64>,
    pub likes_outlier: bool,
    pub comments_outlier: bool,
    pub views_outlier: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TierCounts {
    pub x100: usize,
    pub x50: usize,
    pub x10: usize,
    pub x5: usize,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// Another scanner holds the lock.
    Skipped,
    Completed {
        outliers_found: usize,
        upserted: usize,
        by_multiplier: TierCounts,
    },
}

pub struct OutlierDetector {
    pool: PgPool,
    config: ViralConfig,
    locks: TaskLockStore,
}

impl OutlierDetector {
    pub fn new(pool: PgPool, config: ViralConfig) -> Self {
        let locks = TaskLockStore::new(pool.clone());
        Self {
            pool,
            config,
            locks,
        }
    }

    /// Run the detection query: per-account medians over the median window,
    /// then per-metric outlier tests over the viral window.
    pub async fn detect_outliers(&self) -> Result<Vec<ViralOutlier>> {
        let outliers = sqlx::query_as::<_, ViralOutlier>(
            r#"
            WITH account_stats AS (
                SELECT
                    username,
                    platform,
                    PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY likes) AS median_likes,
                    PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY comments) AS median_comments,
                    PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY views)
                        FILTER (WHERE views IS NOT NULL) AS median_views,
                    PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY likes + comments) AS median_engagement,
                    COUNT(*) AS post_count
                FROM unified_posts
                WHERE posted_at >= NOW() - ($1::int * INTERVAL '1 day')
                GROUP BY username, platform
                HAVING COUNT(*) >= $2
                   AND PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY likes + comments) > 0
            ),
            post_metrics AS (
                SELECT
                    up.source_table,
                    up.source_id::bigint AS source_id,
                    up.username,
                    up.platform,
                    up.content,
                    up.likes::bigint AS likes,
                    up.comments::bigint AS comments,
                    up.views::bigint AS views,
                    (up.likes + up.comments)::bigint AS engagement_total,
                    ast.median_likes,
                    ast.median_comments,
                    ast.median_views,
                    ast.median_engagement
                FROM unified_posts up
                JOIN account_stats ast
                  ON up.username = ast.username AND up.platform = ast.platform
                WHERE up.posted_at >= NOW() - ($3::int * INTERVAL '1 day')
            ),
            validated_outliers AS (
                SELECT
                    pm.*,
                    CASE
                        WHEN pm.median_engagement <= 0 THEN 0
                        WHEN pm.engagement_total >= 100 * pm.median_engagement THEN 100
                        WHEN pm.engagement_total >= 50 * pm.median_engagement THEN 50
                        WHEN pm.engagement_total >= 10 * pm.median_engagement THEN 10
                        WHEN pm.engagement_total >= 5 * pm.median_engagement THEN 5
                        ELSE 0
                    END AS multiplier,
                    (pm.likes >= 5 * GREATEST(pm.median_likes, 1)
                        AND pm.likes >= $4) AS likes_outlier,
                    (pm.comments >= 3 * GREATEST(pm.median_comments, 1)
                        AND pm.comments >= $5) AS comments_outlier,
                    (pm.views IS NOT NULL
                        AND pm.views >= 5 * GREATEST(pm.median_views, 1)
                        AND pm.views >= $6) AS views_outlier,
                    (CASE WHEN pm.likes IS NOT NULL THEN 1 ELSE 0 END
                        + CASE WHEN pm.comments IS NOT NULL THEN 1 ELSE 0 END
                        + CASE WHEN pm.views IS NOT NULL THEN 1 ELSE 0 END) AS available_count,
                    (CASE WHEN pm.likes >= 5 * GREATEST(pm.median_likes, 1)
                           AND pm.likes >= $4 THEN 1 ELSE 0 END
                        + CASE WHEN pm.comments >= 3 * GREATEST(pm.median_comments, 1)
                           AND pm.comments >= $5 THEN 1 ELSE 0 END
                        + CASE WHEN pm.views IS NOT NULL
                           AND pm.views >= 5 * GREATEST(pm.median_views, 1)
                           AND pm.views >= $6 THEN 1 ELSE 0 END) AS support_count
                FROM post_metrics pm
                WHERE pm.engagement_total >= $7
            )
            SELECT
                source_table,
                source_id,
                username,
                platform,
                COALESCE(content, '') AS content,
                LEFT(COALESCE(content, ''), 280) AS hook,
                multiplier::int AS multiplier,
                median_engagement::bigint AS median_engagement,
                engagement_total AS actual_engagement,
                available_count::int AS available_count,
                support_count::int AS support_count,
                likes,
                comments,
                views,
                likes_outlier,
                comments_outlier,
                views_outlier
            FROM validated_outliers
            WHERE multiplier >= 5
              AND (
                (available_count >= 3 AND support_count >= 2)
                OR (available_count = 2 AND support_count >= 2)
                OR (available_count = 1 AND support_count = 1 AND engagement_total >= 500)
              )
            ORDER BY multiplier DESC, engagement_total DESC
            "#,
        )
        .bind(self.config.median_window_days as i32)
        .bind(self.config.min_posts)
        .bind(self.config.viral_window_days as i32)
        .bind(self.config.likes_floor)
        .bind(self.config.comments_floor)
        .bind(self.config.views_floor)
        .bind(self.config.min_engagement)
        .fetch_all(&self.pool)
        .await?;

        info!(count = outliers.len(), "Detected viral outliers");
        Ok(outliers)
    }

    /// Upsert detected outliers. A conflicting row is only touched when
    /// multiplier, engagement, or support actually changed; every write
    /// refreshes analyzed_at and pushes expires_at out.
    pub async fn upsert_outliers(&self, outliers: &[ViralOutlier]) -> Result<usize> {
        let mut upserted = 0usize;

        for outlier in outliers {
            let result = sqlx::query(
                r#"
                INSERT INTO viral_outliers (
                    source_table, source_id, multiplier, median_engagement,
                    actual_engagement, available_count, support_count, hook,
                    platform, username, analyzed_at, expires_at
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    NOW(), NOW() + ($11::int * INTERVAL '1 day')
                )
                ON CONFLICT (source_table, source_id) DO UPDATE SET
                    multiplier = EXCLUDED.multiplier,
                    actual_engagement = EXCLUDED.actual_engagement,
                    available_count = EXCLUDED.available_count,
                    support_count = EXCLUDED.support_count,
                    analyzed_at = NOW(),
                    expires_at = NOW() + ($11::int * INTERVAL '1 day')
                WHERE viral_outliers.multiplier != EXCLUDED.multiplier
                   OR viral_outliers.actual_engagement != EXCLUDED.actual_engagement
                   OR viral_outliers.support_count != EXCLUDED.support_count
                "#,
            )
            .bind(&outlier.source_table)
            .bind(outlier.source_id)
            .bind(outlier.multiplier)
            .bind(outlier.median_engagement)
            .bind(outlier.actual_engagement)
            .bind(outlier.available_count)
            .bind(outlier.support_count)
            .bind(&outlier.hook)
            .bind(&outlier.platform)
            .bind(&outlier.username)
            .bind(self.config.expiry_days as i32)
            .execute(&self.pool)
            .await?;

            upserted += result.rows_affected() as usize;
        }

        info!(total = outliers.len(), upserted, "Upserted outliers");
        Ok(upserted)
    }

    /// Drop outliers whose expiry has passed. Returns the deleted count.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM viral_outliers WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        info!(deleted, "Cleaned up expired outliers");
        Ok(deleted)
    }

    /// Full scan under the singleton lock: detect, upsert, release. A held
    /// lock means another scanner is live and this run exits as skipped.
    pub async fn run_scan(&self) -> Result<ScanOutcome> {
        if !self.locks.acquire(VIRAL_SCANNER_LOCK).await? {
            info!("Viral scanner already running, skipping");
            return Ok(ScanOutcome::Skipped);
        }

        let result = self.scan_inner().await;
        self.locks.release(VIRAL_SCANNER_LOCK).await;

        match &result {
            Ok(ScanOutcome::Completed {
                outliers_found,
                by_multiplier,
                ..
            }) => {
                info!(
                    outliers_found,
                    x100 = by_multiplier.x100,
                    x50 = by_multiplier.x50,
                    x10 = by_multiplier.x10,
                    x5 = by_multiplier.x5,
                    "Viral scan complete"
                );
            }
            Ok(ScanOutcome::Skipped) => {}
            Err(e) => error!(error = %e, "Viral scan failed"),
        }

        result
    }

    async fn scan_inner(&self) -> Result<ScanOutcome> {
        let outliers = self.detect_outliers().await?;
        let upserted = self.upsert_outliers(&outliers).await?;

        let mut tiers = TierCounts::default();
        for outlier in &outliers {
            match outlier.multiplier {
                100 => tiers.x100 += 1,
                50 => tiers.x50 += 1,
                10 => tiers.x10 += 1,
                5 => tiers.x5 += 1,
                _ => {}
            }
        }

        Ok(ScanOutcome::Completed {
            outliers_found: outliers.len(),
            upserted,
            by_multiplier: tiers,
        })
    }
}

// --- Pure acceptance rules ---
//
// Mirror of the SQL decision logic, used by tests and by anything that
// needs to reason about a single post without a database.

/// Per-post metrics with the account baselines attached.
#[derive(Debug, Clone)]
pub struct PostMetrics {
    pub likes: i64,
    pub comments: i64,
    pub views: Option<i64>,
    pub median_likes: f64,
    pub median_comments: f64,
    pub median_views: Option<f64>,
    pub median_engagement: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct OutlierRules {
    pub likes_floor: i64,
    pub comments_floor: i64,
    pub views_floor: i64,
    pub min_engagement: i64,
}

impl OutlierRules {
    pub fn from_config(config: &ViralConfig) -> Self {
        Self {
            likes_floor: config.likes_floor,
            comments_floor: config.comments_floor,
            views_floor: config.views_floor,
            min_engagement: config.min_engagement,
        }
    }

    pub fn engagement_total(post: &PostMetrics) -> i64 {
        post.likes + post.comments
    }

    /// Engagement-ratio tier: 100/50/10/5, or 0 below 5x. A non-positive
    /// median is explicitly tier 0, never a division blow-up into tier 100.
    pub fn multiplier_tier(post: &PostMetrics) -> i32 {
        let engagement = Self::engagement_total(post) as f64;
        if post.median_engagement <= 0.0 {
            0
        } else if engagement >= 100.0 * post.median_engagement {
            100
        } else if engagement >= 50.0 * post.median_engagement {
            50
        } else if engagement >= 10.0 * post.median_engagement {
            10
        } else if engagement >= 5.0 * post.median_engagement {
            5
        } else {
            0
        }
    }

    pub fn likes_outlier(&self, post: &PostMetrics) -> bool {
        post.likes as f64 >= 5.0 * post.median_likes.max(1.0) && post.likes >= self.likes_floor
    }

    pub fn comments_outlier(&self, post: &PostMetrics) -> bool {
        post.comments as f64 >= 3.0 * post.median_comments.max(1.0)
            && post.comments >= self.comments_floor
    }

    pub fn views_outlier(&self, post: &PostMetrics) -> bool {
        match (post.views, post.median_views) {
            (Some(views), median) => {
                views as f64 >= 5.0 * median.unwrap_or(0.0).max(1.0) && views >= self.views_floor
            }
            (None, _) => false,
        }
    }

    /// Metrics present on the post (likes and comments always are; views
    /// only sometimes).
    pub fn available_count(post: &PostMetrics) -> i32 {
        2 + i32::from(post.views.is_some())
    }

    pub fn support_count(&self, post: &PostMetrics) -> i32 {
        i32::from(self.likes_outlier(post))
            + i32::from(self.comments_outlier(post))
            + i32::from(self.views_outlier(post))
    }

    /// The final acceptance decision for one post.
    pub fn is_viral(&self, post: &PostMetrics) -> bool {
        let engagement = Self::engagement_total(post);
        if engagement < self.min_engagement {
            return false;
        }
        if Self::multiplier_tier(post) < 5 {
            return false;
        }

        let available = Self::available_count(post);
        let support = self.support_count(post);
        (available >= 3 && support >= 2)
            || (available == 2 && support >= 2)
            || (available == 1 && support == 1 && engagement >= 500)
    }
}

/// Check an outlier row's internal consistency; rows from the detection
/// query must always satisfy this.
pub fn counts_are_consistent(available_count: i32, support_count: i32) -> bool {
    support_count <= available_count && available_count <= 3 && support_count >= 0
}

/// Two-row scan comparison: an upsert only changes rows whose metrics moved.
pub fn metrics_changed(previous: &ViralOutlier, next: &ViralOutlier) -> bool {
    previous.multiplier != next.multiplier
        || previous.actual_engagement != next.actual_engagement
        || previous.support_count != next.support_count
}

/// True when an outlier row is past its expiry and eligible for deletion.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at < now
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rules() -> OutlierRules {
        OutlierRules::from_config(&ViralConfig::default())
    }

    fn baseline() -> PostMetrics {
        PostMetrics {
            likes: 0,
            comments: 0,
            views: None,
            median_likes: 500.0,
            median_comments: 50.0,
            median_views: None,
            median_engagement: 600.0,
        }
    }

    #[test]
    fn two_metric_outlier_is_accepted() {
        // likes=5000, comments=250, views=NULL against medians (500, 50, 600):
        // ratio 8.75 → tier 5; likes and comments both fire; available 2,
        // support 2 → accepted.
        let post = PostMetrics {
            likes: 5000,
            comments: 250,
            ..baseline()
        };
        assert_eq!(OutlierRules::engagement_total(&post), 5250);
        assert_eq!(OutlierRules::multiplier_tier(&post), 5);
        assert!(rules().likes_outlier(&post));
        assert!(rules().comments_outlier(&post));
        assert!(!rules().views_outlier(&post));
        assert_eq!(OutlierRules::available_count(&post), 2);
        assert_eq!(rules().support_count(&post), 2);
        assert!(rules().is_viral(&post));
    }

    #[test]
    fn single_supporting_metric_at_two_available_is_rejected() {
        // Only the likes test fires; with two metrics available a single
        // supporting metric is not enough.
        let post = PostMetrics {
            likes: 5000,
            comments: 0,
            ..baseline()
        };
        assert_eq!(OutlierRules::available_count(&post), 2);
        assert_eq!(rules().support_count(&post), 1);
        assert!(!rules().is_viral(&post));
    }

    #[test]
    fn nonpositive_median_engagement_is_tier_zero() {
        let post = PostMetrics {
            likes: 100_000,
            comments: 10_000,
            median_engagement: 0.0,
            ..baseline()
        };
        assert_eq!(OutlierRules::multiplier_tier(&post), 0);
        assert!(!rules().is_viral(&post));
    }

    #[test]
    fn null_views_never_fire_the_views_test() {
        let post = PostMetrics {
            likes: 10_000,
            comments: 1000,
            views: None,
            median_views: Some(100.0),
            ..baseline()
        };
        assert!(!rules().views_outlier(&post));
    }

    #[test]
    fn tier_boundaries() {
        let tiers = [(5, 5), (10, 10), (50, 50), (100, 100), (101, 100), (4, 0)];
        for (ratio, expected) in tiers {
            let post = PostMetrics {
                likes: 100 * ratio,
                comments: 0,
                median_engagement: 100.0,
                ..baseline()
            };
            assert_eq!(
                OutlierRules::multiplier_tier(&post),
                expected,
                "ratio {ratio}"
            );
        }
    }

    #[test]
    fn floors_gate_each_metric() {
        // 5x over a tiny median but below the absolute floor.
        let post = PostMetrics {
            likes: 40,
            comments: 8,
            median_likes: 2.0,
            median_comments: 1.0,
            ..baseline()
        };
        assert!(!rules().likes_outlier(&post));
        assert!(!rules().comments_outlier(&post));
    }

    #[test]
    fn three_available_needs_two_supporting() {
        let post = PostMetrics {
            likes: 5000,
            comments: 3,
            views: Some(100_000),
            median_views: Some(1000.0),
            ..baseline()
        };
        assert_eq!(OutlierRules::available_count(&post), 3);
        assert_eq!(rules().support_count(&post), 2);
        assert!(rules().is_viral(&post));
    }

    #[test]
    fn engagement_floor_rejects_small_posts() {
        let post = PostMetrics {
            likes: 80,
            comments: 10,
            median_likes: 10.0,
            median_comments: 1.0,
            median_engagement: 11.0,
            ..baseline()
        };
        // Well past 5x on ratio, but total engagement 90 < 100.
        assert!(OutlierRules::multiplier_tier(&post) >= 5);
        assert!(!rules().is_viral(&post));
    }

    #[test]
    fn support_never_exceeds_available() {
        let posts = [
            PostMetrics {
                likes: 5000,
                comments: 250,
                ..baseline()
            },
            PostMetrics {
                likes: 5000,
                comments: 250,
                views: Some(1_000_000),
                median_views: Some(100.0),
                ..baseline()
            },
        ];
        for post in &posts {
            let available = OutlierRules::available_count(post);
            let support = rules().support_count(post);
            assert!(counts_are_consistent(available, support));
        }
    }

    #[test]
    fn upsert_gate_requires_a_metric_change() {
        let row = ViralOutlier {
            source_table: "hashtag_posts".to_string(),
            source_id: 1,
            username: "studio".to_string(),
            platform: "instagram".to_string(),
            content: "hook".to_string(),
            hook: "hook".to_string(),
            multiplier: 10,
            median_engagement: 600,
            actual_engagement: 6000,
            available_count: 2,
            support_count: 2,
            likes: 5000,
            comments: 1000,
            views: None,
            likes_outlier: true,
            comments_outlier: true,
            views_outlier: false,
        };
        let same = row.clone();
        assert!(!metrics_changed(&row, &same));

        let mut moved = row.clone();
        moved.actual_engagement = 7000;
        assert!(metrics_changed(&row, &moved));
    }

    #[test]
    fn expiry_check_is_strict() {
        let now = Utc::now();
        assert!(is_expired(now - Duration::days(1), now));
        assert!(!is_expired(now + Duration::days(1), now));
        assert!(!is_expired(now, now));
    }
}
