//! Cross-module pipeline tests: the literal ingest scenarios, driven
//! through the real normalize → score → chunk → extract stages with a mock
//! LLM. Store round-trips are covered by the per-module unit tests; these
//! assert the stage wiring.

use chrono::{Duration, Utc};
use std::sync::Arc;

use llm_client::MockClient;
use playpulse_common::{ChunkConfig, QualityConfig};

use crate::chunker::{build_metadata_header, create_chunks};
use crate::extractor::StrategyExtractor;
use crate::normalize::normalize_text;
use crate::quality::{compute_quality_score, is_high_quality, passes_quality_filter};
use crate::scheduler::{is_spike, spike_factor};

#[test]
fn basic_ingest_scores_and_passes() {
    // Scenario: r/gamedev post "Launch tips", score 50, 12 comments, 1h old.
    let now = Utc::now();
    let created = now - Duration::hours(1);
    let quality_config = QualityConfig::default();

    let title = normalize_text("Launch tips", "");
    let body = normalize_text("Use wishlists. Post on r/IndieDev.", "u1");

    // Subreddit mention is preserved, only u/ names are masked.
    assert_eq!(body.text, "Use wishlists. Post on r/IndieDev.");

    let quality = compute_quality_score(
        50, 12, created, None, false, false, &quality_config, now,
    );
    assert!((quality - 2.5410).abs() < 0.01);
    assert!(passes_quality_filter(50, 12, created, quality, false, &quality_config, now));
    assert!(is_high_quality(quality, &quality_config));

    // A short body produces no chunk; a 2000-char body produces exactly one.
    let header = build_metadata_header(
        "gamedev",
        50,
        &created.to_rfc3339(),
        "https://reddit.com/r/gamedev/abc",
        &title.text,
    );
    let chunk_config = ChunkConfig::default();
    let short = format!("{}\n\n{}", title.text, body.text);
    assert!(create_chunks(&short, &header, &chunk_config).is_empty());

    let long_body = "wishlist strategy notes ".repeat(84); // ~2016 chars
    let long = format!("{}\n\n{}", title.text, long_body);
    let chunks = create_chunks(&long, &header, &chunk_config);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].text.contains("Title: Launch tips"));
}

#[test]
fn deleted_comment_produces_no_chunk_text() {
    // Scenario: comment body "[deleted]" is stored upstream, but normalized
    // text is empty so the chunker never sees content.
    let norm = normalize_text("[deleted]", "u2");
    assert!(norm.is_deleted);
    assert!(!norm.is_removed);
    assert!(norm.text.is_empty());

    let chunk_config = ChunkConfig::default();
    assert!(create_chunks(&norm.text, "header", &chunk_config).is_empty());
}

#[test]
fn spike_alert_fires_at_fifteen_over_three() {
    // Scenario: 15 items in the last 24h, 3 in the previous 24h.
    let factor = spike_factor(15, 3);
    assert_eq!(factor, 5.0);
    assert!(is_spike(factor, 15, 2.0));
}

#[tokio::test]
async fn extraction_stage_attaches_permalink() {
    let extractor = StrategyExtractor::with_client(Arc::new(MockClient::strategy_card()));
    let title = normalize_text("Launch tips", "");
    let body = normalize_text("Use wishlists.", "u1");

    let card = extractor
        .extract(
            &title.text,
            &body.text,
            &["wishlists first".to_string()],
            "https://reddit.com/r/gamedev/abc",
        )
        .await
        .expect("mock extraction yields a card");

    assert_eq!(
        card.evidence.permalink.as_deref(),
        Some("https://reddit.com/r/gamedev/abc")
    );
    for snippet in &card.evidence.quote_snippets {
        assert!(snippet.split_whitespace().count() <= 21);
    }
}

#[test]
fn rerunning_normalization_and_chunking_is_stable() {
    // Idempotence at the pipeline level: same input, same chunk hashes.
    let chunk_config = ChunkConfig::default();
    let body = normalize_text(&"**Marketing** advice paragraph. ".repeat(120), "author");
    let header = build_metadata_header("gamedev", 10, "t", "u", "title");

    let first = create_chunks(&body.text, &header, &chunk_config);
    let second = create_chunks(&body.text, &header, &chunk_config);
    assert_eq!(first, second);

    let renormalized = normalize_text(&body.text, "author");
    assert_eq!(renormalized.text, body.text);
}
