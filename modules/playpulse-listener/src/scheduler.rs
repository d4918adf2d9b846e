//! Per-source ingestion loop: fetch, normalize, score, persist, chunk,
//! extract, then spike-check. State advances only after a full pass so a
//! cancelled run never corrupts the watermark.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use playpulse_common::{Config, FetchedPost, Result, SourceKind};

use crate::chunker::{build_metadata_header, create_chunks};
use crate::extractor::StrategyExtractor;
use crate::fetcher::Fetcher;
use crate::normalize::normalize_text;
use crate::quality::{compute_quality_score, is_high_quality, passes_quality_filter, quality_tier};
use crate::store::{InsertAlert, InsertCard, Source, Store, UpsertComment, UpsertItem};

/// Minimum items in the 24h window before a spike alert fires, to avoid
/// noise on low-volume sources.
pub const MIN_SPIKE_COUNT: i64 = 10;

const SPIKE_METRIC: &str = "item_volume_24h";
const BACKFILL_FETCH_LIMIT: u32 = 1000;

pub struct Scheduler {
    store: Store,
    fetcher: Arc<dyn Fetcher>,
    extractor: StrategyExtractor,
    config: Config,
}

impl Scheduler {
    pub fn new(
        store: Store,
        fetcher: Arc<dyn Fetcher>,
        extractor: StrategyExtractor,
        config: Config,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractor,
            config,
        }
    }

    /// One pass over all enabled sources. A failing source is logged and
    /// skipped; it never starves the others.
    pub async fn run_once(&self) -> Result<()> {
        info!("Starting listener run");
        let sources = self.store.enabled_sources().await?;
        info!(count = sources.len(), "Processing sources");

        for source in &sources {
            if let Err(e) = self.process_source(source).await {
                error!(
                    source_id = source.id,
                    value = %source.value,
                    error = %e,
                    "Error processing source"
                );
            }
        }

        info!("Listener run completed");
        Ok(())
    }

    /// Process a single source: fetch, ingest, chunk, extract, spike-check.
    /// Returns the number of new items seen.
    pub async fn process_source(&self, source: &Source) -> Result<usize> {
        let Some(kind) = source.kind() else {
            warn!(source_id = source.id, kind = %source.kind, "Unknown source kind, skipping");
            return Ok(0);
        };

        info!(
            source_id = source.id,
            kind = %source.kind,
            value = %source.value,
            "Processing source"
        );

        let state = self.store.listener_state(source.id).await?;
        let last_seen = state.and_then(|s| s.last_seen_created_utc);

        let posts = match kind {
            SourceKind::Subreddit => {
                self.fetcher
                    .fetch_subreddit_new(&source.value, self.config.default_fetch_limit, last_seen)
                    .await?
            }
            SourceKind::Keyword => {
                self.fetcher
                    .fetch_search(
                        &source.value,
                        source.subreddit.as_deref(),
                        self.config.default_fetch_limit,
                        last_seen,
                    )
                    .await?
            }
        };

        let mut seen = 0usize;
        let mut max_created: Option<DateTime<Utc>> = last_seen;

        for post in &posts {
            seen += 1;
            if max_created.map(|m| post.created_utc > m).unwrap_or(true) {
                max_created = Some(post.created_utc);
            }
            self.ingest_post(source, post, Utc::now()).await?;
        }

        if seen > 0 {
            if let Some(watermark) = max_created {
                self.store.update_listener_state(source.id, watermark).await?;
            }
            self.check_for_spikes(source.id).await?;
        }

        Ok(seen)
    }

    /// Normalize, score, and (when it clears the filter) persist one post
    /// with its chunks, comments, and strategy card.
    async fn ingest_post(
        &self,
        source: &Source,
        post: &FetchedPost,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let norm_title = normalize_text(&post.title, "");
        let norm_body = normalize_text(&post.body, &post.author);

        let removed = norm_body.is_removed || post.removed;
        let quality = compute_quality_score(
            post.score,
            post.num_comments,
            post.created_utc,
            post.author_flair.as_deref(),
            post.nsfw,
            removed,
            &self.config.quality,
            now,
        );

        if !passes_quality_filter(
            post.score,
            post.num_comments,
            post.created_utc,
            quality,
            post.removed,
            &self.config.quality,
            now,
        ) {
            debug!(
                external_id = %post.external_id,
                quality,
                tier = quality_tier(quality, &self.config.quality),
                "Post filtered out"
            );
            return Ok(());
        }

        let item_id = self
            .store
            .upsert_item(UpsertItem {
                source_id: source.id,
                external_id: &post.external_id,
                external_url: &post.external_url,
                subreddit: &post.subreddit,
                title: &post.title,
                body: &post.body,
                author: &post.author,
                author_flair: post.author_flair.as_deref(),
                score: post.score,
                num_comments: post.num_comments,
                created_utc: post.created_utc,
                quality_score: quality,
                nsfw: post.nsfw,
                removed: post.removed,
                raw_json: &post.raw_json,
            })
            .await?;

        // Chunk title + body together for retrieval.
        let header = build_metadata_header(
            &post.subreddit,
            post.score,
            &post.created_utc.to_rfc3339(),
            &post.external_url,
            &norm_title.text,
        );
        let full_text = format!("{}\n\n{}", norm_title.text, norm_body.text);
        for chunk in create_chunks(&full_text, &header, &self.config.chunks) {
            self.store
                .insert_chunk(item_id, None, &chunk.text, &chunk.hash)
                .await?;
        }

        let mut top_comment_texts: Vec<String> = Vec::new();
        if is_high_quality(quality, &self.config.quality) {
            debug!(external_id = %post.external_id, "Fetching comments for high-quality item");
            let comments = self
                .fetcher
                .fetch_comments(
                    &post.external_id,
                    self.config.comments_fetch_limit,
                    self.config.comments_depth,
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(external_id = %post.external_id, error = %e, "Comment fetch failed");
                    Vec::new()
                });

            for comment in &comments {
                let norm_comment = normalize_text(&comment.body, &comment.author);
                if norm_comment.is_removed || norm_comment.is_deleted {
                    continue;
                }
                top_comment_texts.push(norm_comment.text.clone());

                let comment_id = self
                    .store
                    .upsert_comment(UpsertComment {
                        item_id,
                        external_id: &comment.external_id,
                        parent_external_id: comment.parent_external_id.as_deref(),
                        body: &comment.body,
                        author: &comment.author,
                        author_flair: comment.author_flair.as_deref(),
                        score: comment.score,
                        created_utc: comment.created_utc,
                        removed: comment.removed,
                        raw_json: &comment.raw_json,
                    })
                    .await?;

                if norm_comment.text.chars().count() > self.config.chunks.min_chars {
                    let comment_header = build_metadata_header(
                        &post.subreddit,
                        comment.score,
                        &comment.created_utc.to_rfc3339(),
                        &post.external_url,
                        &format!("Comment on: {}", norm_title.text),
                    );
                    for chunk in
                        create_chunks(&norm_comment.text, &comment_header, &self.config.chunks)
                    {
                        self.store
                            .insert_chunk(item_id, Some(comment_id), &chunk.text, &chunk.hash)
                            .await?;
                    }
                }
            }
        }

        if let Some(card) = self
            .extractor
            .extract(
                &norm_title.text,
                &norm_body.text,
                &top_comment_texts,
                &post.external_url,
            )
            .await
        {
            self.persist_card(item_id, None, &card).await?;
        }

        Ok(())
    }

    async fn persist_card(
        &self,
        item_id: i64,
        comment_id: Option<i64>,
        card: &crate::extractor::StrategyCard,
    ) -> Result<()> {
        let steps = serde_json::to_value(&card.steps).unwrap_or_default();
        let risks = serde_json::to_value(&card.risks).unwrap_or_default();
        let evidence = serde_json::to_value(&card.evidence).unwrap_or_default();

        self.store
            .insert_strategy_card(InsertCard {
                item_id,
                comment_id,
                platform_targets: &card.platform_targets,
                niche: card.niche.as_deref().unwrap_or("general"),
                tactic: &card.tactic,
                steps: &steps,
                preconditions: &card.preconditions,
                metrics: &card.metrics,
                risks: &risks,
                confidence: card.confidence,
                evidence: &evidence,
            })
            .await?;
        Ok(())
    }

    /// Compare the last 24h of item volume to the previous 24h and record
    /// an alert when volume at least doubled on meaningful counts.
    pub async fn check_for_spikes(&self, source_id: i64) -> Result<()> {
        let now = Utc::now();
        let current_start = now - Duration::days(1);
        let previous_start = now - Duration::days(2);

        let current = self
            .store
            .count_items_in_window(source_id, current_start, now)
            .await?;
        let previous = self
            .store
            .count_items_in_window(source_id, previous_start, current_start)
            .await?;

        let factor = spike_factor(current, previous);
        if !is_spike(factor, current, self.config.spike_factor_threshold) {
            return Ok(());
        }

        warn!(source_id, factor, current, "Spike detected");

        let top_items = self
            .store
            .top_items_in_window(source_id, current_start, now, 5)
            .await?;

        self.store
            .insert_alert(InsertAlert {
                source_id,
                window_start: current_start,
                window_end: now,
                metric: SPIKE_METRIC,
                current_value: current as f64,
                previous_value: previous as f64,
                factor,
                top_item_external_ids: &top_items,
            })
            .await?;

        Ok(())
    }

    /// Backfill historical posts for one source. Items are scored and
    /// stored but the watermark is left untouched, so the next normal pass
    /// still picks up from where it was.
    pub async fn backfill(&self, source_id: i64, hours: i64) -> Result<usize> {
        info!(source_id, hours, "Starting backfill");

        let sources = self.store.enabled_sources().await?;
        let Some(source) = sources.into_iter().find(|s| s.id == source_id) else {
            return Err(playpulse_common::PulseError::Validation(format!(
                "source {source_id} not found or disabled"
            )));
        };
        let Some(kind) = source.kind() else {
            return Err(playpulse_common::PulseError::Validation(format!(
                "source {source_id} has unknown kind {}",
                source.kind
            )));
        };

        let cutoff = Utc::now() - Duration::hours(hours);

        let posts = match kind {
            SourceKind::Subreddit => {
                self.fetcher
                    .fetch_subreddit_new(&source.value, BACKFILL_FETCH_LIMIT, None)
                    .await?
            }
            SourceKind::Keyword => {
                self.fetcher
                    .fetch_search(
                        &source.value,
                        source.subreddit.as_deref(),
                        BACKFILL_FETCH_LIMIT,
                        None,
                    )
                    .await?
            }
        };

        let now = Utc::now();
        let mut stored = 0usize;
        for post in &posts {
            if post.created_utc < cutoff {
                info!(%cutoff, "Reached backfill cutoff");
                break;
            }

            let norm_body = normalize_text(&post.body, &post.author);
            let removed = norm_body.is_removed || post.removed;
            let quality = compute_quality_score(
                post.score,
                post.num_comments,
                post.created_utc,
                post.author_flair.as_deref(),
                post.nsfw,
                removed,
                &self.config.quality,
                now,
            );

            if passes_quality_filter(
                post.score,
                post.num_comments,
                post.created_utc,
                quality,
                post.removed,
                &self.config.quality,
                now,
            ) {
                self.store
                    .upsert_item(UpsertItem {
                        source_id: source.id,
                        external_id: &post.external_id,
                        external_url: &post.external_url,
                        subreddit: &post.subreddit,
                        title: &post.title,
                        body: &post.body,
                        author: &post.author,
                        author_flair: post.author_flair.as_deref(),
                        score: post.score,
                        num_comments: post.num_comments,
                        created_utc: post.created_utc,
                        quality_score: quality,
                        nsfw: post.nsfw,
                        removed: post.removed,
                        raw_json: &post.raw_json,
                    })
                    .await?;
                stored += 1;
            }
        }

        info!(source_id, stored, "Backfill complete");
        Ok(stored)
    }

    /// Run the extractor over stored items that never got a card.
    pub async fn reprocess_cards(&self, limit: i64) -> Result<usize> {
        let items = self.store.items_without_cards(limit).await?;
        info!(count = items.len(), "Reprocessing items without strategy cards");

        let mut extracted = 0usize;
        for item in &items {
            let norm_title = normalize_text(&item.title, "");
            let norm_body = normalize_text(&item.body, "");

            if let Some(card) = self
                .extractor
                .extract(&norm_title.text, &norm_body.text, &[], &item.external_url)
                .await
            {
                self.persist_card(item.id, None, &card).await?;
                extracted += 1;
            }
        }

        info!(extracted, total = items.len(), "Reprocessing complete");
        Ok(extracted)
    }
}

/// Current-over-previous volume ratio. With an empty previous window the
/// current count itself is the factor, so brand-new sources can still trip
/// the threshold.
pub fn spike_factor(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        if current > 0 {
            current as f64
        } else {
            0.0
        }
    } else {
        current as f64 / previous as f64
    }
}

pub fn is_spike(factor: f64, current: i64, threshold: f64) -> bool {
    factor >= threshold && current >= MIN_SPIKE_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_is_ratio_when_previous_nonzero() {
        assert_eq!(spike_factor(15, 3), 5.0);
        assert_eq!(spike_factor(4, 8), 0.5);
    }

    #[test]
    fn factor_degenerates_to_count_on_empty_previous() {
        assert_eq!(spike_factor(7, 0), 7.0);
        assert_eq!(spike_factor(0, 0), 0.0);
    }

    #[test]
    fn spike_requires_both_factor_and_volume() {
        // 15 vs 3: factor 5.0, volume 15: alert.
        assert!(is_spike(spike_factor(15, 3), 15, 2.0));
        // Doubled but tiny volume: no alert.
        assert!(!is_spike(spike_factor(8, 2), 8, 2.0));
        // High volume but flat: no alert.
        assert!(!is_spike(spike_factor(30, 25), 30, 2.0));
    }
}
