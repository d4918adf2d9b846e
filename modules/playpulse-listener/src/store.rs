//! Postgres persistence for the listener pipeline. All writes are upserts
//! gated on natural keys; raw payloads are semantically pruned before they
//! touch the database.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;

use playpulse_common::{Result, SourceKind};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

/// A listener source row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Source {
    pub id: i64,
    pub user_id: i64,
    pub group_id: Option<i64>,
    pub kind: String,
    pub value: String,
    pub subreddit: Option<String>,
    pub enabled: bool,
}

impl Source {
    pub fn kind(&self) -> Option<SourceKind> {
        SourceKind::from_str_loose(&self.kind)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListenerState {
    pub last_seen_created_utc: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Fields of an item relevant to reprocessing.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub external_id: String,
    pub external_url: String,
    pub title: String,
    pub body: String,
    pub quality_score: f64,
}

pub struct UpsertItem<'a> {
    pub source_id: i64,
    pub external_id: &'a str,
    pub external_url: &'a str,
    pub subreddit: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub author: &'a str,
    pub author_flair: Option<&'a str>,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub quality_score: f64,
    pub nsfw: bool,
    pub removed: bool,
    pub raw_json: &'a Value,
}

pub struct UpsertComment<'a> {
    pub item_id: i64,
    pub external_id: &'a str,
    pub parent_external_id: Option<&'a str>,
    pub body: &'a str,
    pub author: &'a str,
    pub author_flair: Option<&'a str>,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub removed: bool,
    pub raw_json: &'a Value,
}

pub struct InsertCard<'a> {
    pub item_id: i64,
    pub comment_id: Option<i64>,
    pub platform_targets: &'a [String],
    pub niche: &'a str,
    pub tactic: &'a str,
    pub steps: &'a Value,
    pub preconditions: &'a Value,
    pub metrics: &'a Value,
    pub risks: &'a Value,
    pub confidence: f64,
    pub evidence: &'a Value,
}

pub struct InsertAlert<'a> {
    pub source_id: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub metric: &'a str,
    pub current_value: f64,
    pub previous_value: f64,
    pub factor: f64,
    pub top_item_external_ids: &'a [String],
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| playpulse_common::PulseError::Other(e.into()))?;
        Ok(())
    }

    // --- Sources ---

    /// Create a source, normalizing value and subreddit to lowercase.
    /// Returns the existing id when the natural key already exists.
    pub async fn create_source(
        &self,
        user_id: i64,
        group_id: Option<i64>,
        kind: SourceKind,
        value: &str,
        subreddit: Option<&str>,
    ) -> Result<i64> {
        let value = value.trim().to_lowercase();
        let subreddit = subreddit
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO reddit_sources (user_id, group_id, kind, value, subreddit, enabled)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(group_id)
        .bind(kind.as_str())
        .bind(&value)
        .bind(&subreddit)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing: i64 = sqlx::query_scalar(
            r#"
            SELECT id FROM reddit_sources
            WHERE user_id = $1
              AND group_id IS NOT DISTINCT FROM $2
              AND kind = $3
              AND value = $4
              AND subreddit IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(user_id)
        .bind(group_id)
        .bind(kind.as_str())
        .bind(&value)
        .bind(&subreddit)
        .fetch_one(&self.pool)
        .await?;

        Ok(existing)
    }

    pub async fn enabled_sources(&self) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            r#"
            SELECT id, user_id, group_id, kind, value, subreddit, enabled
            FROM reddit_sources
            WHERE enabled = TRUE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    /// Delete a source; all dependent rows cascade. When `user_id` is given
    /// the source must belong to that user. Returns whether a row went away.
    pub async fn delete_source(&self, source_id: i64, user_id: Option<i64>) -> Result<bool> {
        let result = match user_id {
            Some(uid) => {
                sqlx::query("DELETE FROM reddit_sources WHERE id = $1 AND user_id = $2")
                    .bind(source_id)
                    .bind(uid)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM reddit_sources WHERE id = $1")
                    .bind(source_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    // --- Items ---

    /// Upsert a post. Conflict on (platform, external_id) refreshes the
    /// mutable engagement fields; creation metadata is never rewritten.
    pub async fn upsert_item(&self, item: UpsertItem<'_>) -> Result<i64> {
        let pruned = prune_raw_json(item.raw_json, 2).unwrap_or(Value::Null);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reddit_items (
                source_id, platform, subreddit, external_id, external_url,
                title, body, author, author_flair, score, num_comments,
                created_utc, fetched_at, quality_score, nsfw, removed, raw_json
            ) VALUES (
                $1, 'reddit', $2, $3, $4,
                $5, $6, $7, $8, $9, $10,
                $11, NOW(), $12, $13, $14, $15
            )
            ON CONFLICT (platform, external_id) DO UPDATE SET
                score = EXCLUDED.score,
                num_comments = EXCLUDED.num_comments,
                quality_score = EXCLUDED.quality_score,
                fetched_at = NOW(),
                removed = EXCLUDED.removed,
                raw_json = EXCLUDED.raw_json
            RETURNING id
            "#,
        )
        .bind(item.source_id)
        .bind(item.subreddit)
        .bind(item.external_id)
        .bind(item.external_url)
        .bind(item.title)
        .bind(item.body)
        .bind(item.author)
        .bind(item.author_flair)
        .bind(item.score)
        .bind(item.num_comments)
        .bind(item.created_utc)
        .bind(item.quality_score)
        .bind(item.nsfw)
        .bind(item.removed)
        .bind(&pruned)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Items above the card threshold that have no strategy card yet,
    /// best first.
    pub async fn items_without_cards(&self, limit: i64) -> Result<Vec<ItemRow>> {
        let items = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT ri.id, ri.external_id, ri.external_url, ri.title, ri.body, ri.quality_score
            FROM reddit_items ri
            LEFT JOIN strategy_cards sc ON sc.item_id = ri.id
            WHERE sc.id IS NULL
              AND ri.quality_score >= 0.3
            ORDER BY ri.quality_score DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // --- Comments ---

    pub async fn upsert_comment(&self, comment: UpsertComment<'_>) -> Result<i64> {
        let pruned = prune_raw_json(comment.raw_json, 2).unwrap_or(Value::Null);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reddit_comments (
                item_id, external_id, parent_external_id, body, author,
                author_flair, score, created_utc, fetched_at, removed, raw_json
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, NOW(), $9, $10
            )
            ON CONFLICT (item_id, external_id) DO UPDATE SET
                body = EXCLUDED.body,
                score = EXCLUDED.score,
                fetched_at = NOW(),
                removed = EXCLUDED.removed,
                raw_json = EXCLUDED.raw_json
            RETURNING id
            "#,
        )
        .bind(comment.item_id)
        .bind(comment.external_id)
        .bind(comment.parent_external_id)
        .bind(comment.body)
        .bind(comment.author)
        .bind(comment.author_flair)
        .bind(comment.score)
        .bind(comment.created_utc)
        .bind(comment.removed)
        .bind(&pruned)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    // --- Chunks ---

    /// Insert a chunk unless its hash already exists. Returns the new id,
    /// or None for a duplicate.
    pub async fn insert_chunk(
        &self,
        item_id: i64,
        comment_id: Option<i64>,
        chunk_text: &str,
        chunk_hash: &str,
    ) -> Result<Option<i64>> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO reddit_chunks (item_id, comment_id, chunk_text, chunk_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chunk_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(item_id)
        .bind(comment_id)
        .bind(chunk_text)
        .bind(chunk_hash)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(e) => {
                warn!(error = %e, "Failed to insert chunk");
                Ok(None)
            }
        }
    }

    // --- Strategy cards ---

    /// Insert a strategy card. A second card for the same item/comment is a
    /// silent no-op.
    pub async fn insert_strategy_card(&self, card: InsertCard<'_>) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO strategy_cards (
                source, item_id, comment_id, platform_targets, niche, tactic,
                steps, preconditions, metrics, risks, confidence, evidence
            ) VALUES (
                'reddit', $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10, $11
            )
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(card.item_id)
        .bind(card.comment_id)
        .bind(card.platform_targets)
        .bind(card.niche)
        .bind(card.tactic)
        .bind(card.steps)
        .bind(card.preconditions)
        .bind(card.metrics)
        .bind(card.risks)
        .bind(card.confidence)
        .bind(card.evidence)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    // --- Listener state ---

    pub async fn listener_state(&self, source_id: i64) -> Result<Option<ListenerState>> {
        let state = sqlx::query_as::<_, ListenerState>(
            r#"
            SELECT last_seen_created_utc, last_run_at
            FROM listener_state
            WHERE source_id = $1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    /// Advance the watermark for a source. The stored timestamp never moves
    /// backwards, even if a caller passes a stale value.
    pub async fn update_listener_state(
        &self,
        source_id: i64,
        last_seen_created_utc: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listener_state (source_id, last_seen_created_utc, last_run_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (source_id) DO UPDATE SET
                last_seen_created_utc =
                    GREATEST(listener_state.last_seen_created_utc, EXCLUDED.last_seen_created_utc),
                last_run_at = NOW()
            "#,
        )
        .bind(source_id)
        .bind(last_seen_created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Alerts & windows ---

    pub async fn insert_alert(&self, alert: InsertAlert<'_>) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reddit_alerts (
                source_id, window_start, window_end, metric,
                current_value, previous_value, factor, top_item_external_ids
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(alert.source_id)
        .bind(alert.window_start)
        .bind(alert.window_end)
        .bind(alert.metric)
        .bind(alert.current_value)
        .bind(alert.previous_value)
        .bind(alert.factor)
        .bind(alert.top_item_external_ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn count_items_in_window(
        &self,
        source_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM reddit_items
            WHERE source_id = $1
              AND created_utc >= $2
              AND created_utc < $3
            "#,
        )
        .bind(source_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// External ids of the top items by quality score in a window.
    pub async fn top_items_in_window(
        &self,
        source_id: i64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT external_id
            FROM reddit_items
            WHERE source_id = $1
              AND created_utc >= $2
              AND created_utc < $3
            ORDER BY quality_score DESC
            LIMIT $4
            "#,
        )
        .bind(source_id)
        .bind(window_start)
        .bind(window_end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

/// Safe subset of raw-payload keys worth keeping. Everything else (award
/// lists, media variants, preview blobs) is discarded before storage.
const SAFE_KEYS: &[&str] = &[
    // Common
    "id",
    "name",
    "created_utc",
    "permalink",
    "url",
    "score",
    "ups",
    "downs",
    "upvote_ratio",
    "num_comments",
    "over_18",
    // Text/content
    "title",
    "selftext",
    "body",
    "link_flair_text",
    "author_flair_text",
    // Author
    "author",
    "author_fullname",
    "is_submitter",
    // Metadata
    "subreddit",
    "subreddit_id",
    "domain",
    "is_self",
    "is_video",
    "post_hint",
    "whitelist_status",
    "parent_id",
    "link_id",
    // Tree
    "depth",
    "replies",
];

const MAX_LIST_ITEMS: usize = 10;

/// Semantically prune a raw payload: whitelist keys, bound dict nesting,
/// keep only short primitive lists. The output is always valid JSON, never
/// a byte-truncated string.
pub fn prune_raw_json(raw: &Value, max_nested_depth: u32) -> Option<Value> {
    let obj = raw.as_object()?;

    let mut pruned = Map::new();
    for (key, value) in obj {
        if !SAFE_KEYS.contains(&key.as_str()) {
            continue;
        }
        let kept = match value {
            Value::Object(_) => {
                if max_nested_depth > 0 {
                    prune_raw_json(value, max_nested_depth - 1).unwrap_or(Value::Null)
                } else {
                    Value::Object(Map::new())
                }
            }
            Value::Array(items) => {
                let first_is_primitive = items
                    .first()
                    .map(|v| !v.is_object() && !v.is_array())
                    .unwrap_or(false);
                if first_is_primitive {
                    Value::Array(items.iter().take(MAX_LIST_ITEMS).cloned().collect())
                } else {
                    Value::Array(Vec::new())
                }
            }
            other => other.clone(),
        };
        pruned.insert(key.clone(), kept);
    }

    Some(Value::Object(pruned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prune_drops_unknown_keys() {
        let raw = json!({
            "id": "abc",
            "score": 10,
            "all_awardings": [{"icon": "x"}],
            "media_embed": {"content": "huge"},
        });
        let pruned = prune_raw_json(&raw, 2).unwrap();
        let obj = pruned.as_object().unwrap();
        assert!(obj.contains_key("id"));
        assert!(obj.contains_key("score"));
        assert!(!obj.contains_key("all_awardings"));
        assert!(!obj.contains_key("media_embed"));
    }

    #[test]
    fn prune_truncates_primitive_lists() {
        let raw = json!({"replies": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]});
        let pruned = prune_raw_json(&raw, 2).unwrap();
        assert_eq!(pruned["replies"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn prune_empties_object_lists() {
        let raw = json!({"replies": [{"kind": "Listing"}]});
        let pruned = prune_raw_json(&raw, 2).unwrap();
        assert!(pruned["replies"].as_array().unwrap().is_empty());
    }

    #[test]
    fn prune_bounds_nesting_depth() {
        let raw = json!({
            "replies": {"replies": {"replies": {"id": "deep"}}}
        });
        let pruned = prune_raw_json(&raw, 2).unwrap();
        // Two levels survive; the third collapses to an empty object.
        let level3 = &pruned["replies"]["replies"]["replies"];
        assert_eq!(level3, &json!({}));
    }

    #[test]
    fn prune_rejects_non_objects() {
        assert!(prune_raw_json(&json!("just a string"), 2).is_none());
        assert!(prune_raw_json(&json!([1, 2, 3]), 2).is_none());
    }

    #[test]
    fn pruned_output_only_references_safe_keys() {
        let raw = json!({
            "id": "abc",
            "subreddit": "gamedev",
            "secret_field": "x",
            "replies": {"body": "ok", "weird": 1},
        });
        let pruned = prune_raw_json(&raw, 2).unwrap();
        fn assert_safe(value: &Value) {
            if let Some(obj) = value.as_object() {
                for (key, child) in obj {
                    assert!(SAFE_KEYS.contains(&key.as_str()), "unsafe key {key}");
                    assert_safe(child);
                }
            }
        }
        assert_safe(&pruned);
    }
}
