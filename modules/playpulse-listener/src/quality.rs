//! Quality scoring: weighted engagement-and-recency measure used for
//! filtering, comment-fetch gating, and spike-alert ranking.

use chrono::{DateTime, Utc};
use playpulse_common::QualityConfig;

/// Compute a quality score for a post.
///
/// `log1p(score) * W_score + log1p(comments) * W_comments + recency + flair
/// - penalties`, rounded to 4 decimals. Recency decays linearly to zero at
/// `max_age_hours`.
pub fn compute_quality_score(
    score: i64,
    num_comments: i64,
    created_utc: DateTime<Utc>,
    author_flair: Option<&str>,
    nsfw: bool,
    removed: bool,
    config: &QualityConfig,
    now: DateTime<Utc>,
) -> f64 {
    let score_component = (1.0 + score.max(0) as f64).ln() * config.score_weight;
    let comments_component = (1.0 + num_comments.max(0) as f64).ln() * config.comments_weight;

    let age_hours = age_hours(created_utc, now);
    let recency_boost = if age_hours >= config.max_age_hours as f64 {
        0.0
    } else {
        (1.0 - age_hours / config.max_age_hours as f64) * config.recency_weight
    };

    let flair_bonus = match author_flair {
        Some(flair) if !flair.is_empty() => config.flair_bonus,
        _ => 0.0,
    };

    let nsfw_penalty = if nsfw { config.nsfw_penalty } else { 0.0 };
    let removed_penalty = if removed { config.removed_penalty } else { 0.0 };

    let quality = score_component + comments_component + recency_boost + flair_bonus
        - nsfw_penalty
        - removed_penalty;

    (quality * 10_000.0).round() / 10_000.0
}

/// Check whether a post clears every storage threshold. Removed posts never
/// pass; nsfw only affects the score.
pub fn passes_quality_filter(
    score: i64,
    num_comments: i64,
    created_utc: DateTime<Utc>,
    quality_score: f64,
    removed: bool,
    config: &QualityConfig,
    now: DateTime<Utc>,
) -> bool {
    if removed {
        return false;
    }
    if score < config.min_score {
        return false;
    }
    if num_comments < config.min_comments {
        return false;
    }
    if age_hours(created_utc, now) > config.max_age_hours as f64 {
        return false;
    }
    quality_score >= config.min_quality_score
}

/// Whether a post is worth fetching comments for. Twice the storage
/// threshold.
pub fn is_high_quality(quality_score: f64, config: &QualityConfig) -> bool {
    quality_score >= config.min_quality_score * 2.0
}

/// Human-readable tier for a score.
pub fn quality_tier(quality_score: f64, config: &QualityConfig) -> &'static str {
    if quality_score < config.min_quality_score {
        "low"
    } else if quality_score < config.min_quality_score * 2.0 {
        "medium"
    } else if quality_score < config.min_quality_score * 3.0 {
        "high"
    } else {
        "exceptional"
    }
}

fn age_hours(created_utc: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let seconds = (now - created_utc).num_seconds() as f64;
    (seconds / 3600.0).max(0.0)
}
