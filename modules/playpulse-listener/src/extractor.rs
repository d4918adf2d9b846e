//! Strategy-card extraction: turns a normalized post (plus its best
//! comments) into a structured tactic record via the configured LLM.
//! Every failure mode collapses to "no card" so extraction can never stall
//! a pass.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use llm_client::util::{strip_code_blocks, truncate_to_char_boundary};
use llm_client::{ChatClient, ChatMessage, ChatRequest, MockClient, OllamaClient};
use playpulse_common::{truncate_words, LlmConfig};

const MAX_TITLE_CHARS: usize = 500;
const MAX_BODY_CHARS: usize = 2000;
const MAX_COMMENT_CHARS: usize = 300;
const MAX_COMMENTS: usize = 3;
const MAX_SNIPPET_WORDS: usize = 20;

const EXTRACTION_PROMPT: &str = r#"You are a strategy analyst for indie game developers. Analyze this post and extract actionable advice if present.

Post Title: {title}
Post Body: {body}
{comments_section}

If this post contains useful, actionable advice for indie game developers (marketing tips, development advice, community building, launch strategies, social media tactics, etc.), extract it as JSON:
{
  "platform_targets": ["platforms this applies to, e.g. steam, tiktok, instagram, twitter, youtube, discord"],
  "niche": "the niche or industry (e.g. indie games, mobile games, game dev)",
  "tactic": "short summary of the actionable advice (1-2 sentences)",
  "steps": [
    {"step": 1, "action": "first action to take"},
    {"step": 2, "action": "second action to take"}
  ],
  "confidence": 0.0 to 1.0 (how confident you are this is useful advice)
}

If this post does NOT contain actionable advice (e.g., it's just news, a question without good answers, venting, or off-topic), respond with: null

Respond ONLY with valid JSON or the word null. No explanations."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardStep {
    #[serde(default)]
    pub step: i64,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardEvidence {
    #[serde(default)]
    pub quote_snippets: Vec<String>,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// A structured tactic record as stored in strategy_cards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyCard {
    #[serde(default)]
    pub platform_targets: Vec<String>,
    #[serde(default)]
    pub niche: Option<String>,
    #[serde(default)]
    pub tactic: String,
    #[serde(default)]
    pub steps: Vec<CardStep>,
    #[serde(default)]
    pub preconditions: Value,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: CardEvidence,
}

pub struct StrategyExtractor {
    client: Option<Arc<dyn ChatClient>>,
}

impl StrategyExtractor {
    pub fn from_config(config: &LlmConfig) -> Self {
        if !config.enabled {
            return Self { client: None };
        }
        let client: Option<Arc<dyn ChatClient>> = match config.provider.as_str() {
            "mock" => Some(Arc::new(MockClient::strategy_card())),
            "ollama" => Some(Arc::new(OllamaClient::new(
                &config.ollama_host,
                &config.ollama_model,
            ))),
            other => {
                warn!(provider = other, "Unsupported LLM provider, extraction disabled");
                None
            }
        };
        Self { client }
    }

    pub fn with_client(client: Arc<dyn ChatClient>) -> Self {
        Self {
            client: Some(client),
        }
    }

    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Attempt to extract a strategy card. Returns None when extraction is
    /// disabled, the model declines, or anything goes wrong.
    pub async fn extract(
        &self,
        title: &str,
        body: &str,
        top_comments: &[String],
        permalink: &str,
    ) -> Option<StrategyCard> {
        let client = self.client.as_ref()?;

        let prompt = build_prompt(title, body, top_comments);
        let request = ChatRequest::new(vec![ChatMessage::user(prompt)]);

        let response = match client.chat(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Strategy extraction request failed");
                return None;
            }
        };

        match parse_card_response(&response, permalink) {
            Some(card) => {
                info!(tactic = %truncate_words(&card.tactic, 8), "Extracted strategy card");
                Some(card)
            }
            None => {
                debug!("No strategy card for this post");
                None
            }
        }
    }
}

fn build_prompt(title: &str, body: &str, top_comments: &[String]) -> String {
    let comments_section = if top_comments.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = top_comments
            .iter()
            .take(MAX_COMMENTS)
            .map(|c| format!("- {}", truncate_to_char_boundary(c, MAX_COMMENT_CHARS)))
            .collect();
        format!("Top Comments:\n{}", lines.join("\n"))
    };

    EXTRACTION_PROMPT
        .replace("{title}", truncate_to_char_boundary(title, MAX_TITLE_CHARS))
        .replace("{body}", truncate_to_char_boundary(body, MAX_BODY_CHARS))
        .replace("{comments_section}", &comments_section)
}

/// Parse the model's reply into a card, or None.
///
/// Accepts the literal `null`, a JSON object, a fenced JSON object, or an
/// array (first element wins). The permalink is always injected over
/// whatever the model put in evidence, and quote snippets are capped at
/// 20 words each.
pub fn parse_card_response(response: &str, permalink: &str) -> Option<StrategyCard> {
    let content = response.trim();
    if content.is_empty() || content.eq_ignore_ascii_case("null") {
        return None;
    }

    let content = strip_code_blocks(content);
    if content.is_empty() || content.eq_ignore_ascii_case("null") {
        return None;
    }

    let value: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Failed to parse LLM response as JSON");
            return None;
        }
    };

    let value = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };

    let mut card: StrategyCard = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "LLM response did not match card schema");
            return None;
        }
    };

    if card.tactic.is_empty() || card.platform_targets.is_empty() {
        warn!("LLM returned card missing required fields");
        return None;
    }

    card.evidence.permalink = Some(permalink.to_string());
    card.evidence.quote_snippets = card
        .evidence
        .quote_snippets
        .iter()
        .map(|s| truncate_words(s, MAX_SNIPPET_WORDS))
        .collect();

    Some(card)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_JSON: &str = r#"{
        "platform_targets": ["tiktok"],
        "niche": "indie games",
        "tactic": "Post devlogs weekly",
        "steps": [{"step": 1, "action": "Record a clip"}],
        "confidence": 0.8,
        "evidence": {"quote_snippets": ["weekly devlogs kept our wishlists climbing steadily"], "permalink": "http://wrong"}
    }"#;

    #[test]
    fn null_and_empty_responses_yield_no_card() {
        assert!(parse_card_response("null", "p").is_none());
        assert!(parse_card_response("NULL", "p").is_none());
        assert!(parse_card_response("  ", "p").is_none());
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let fenced = format!("```json\n{CARD_JSON}\n```");
        let card = parse_card_response(&fenced, "https://reddit.com/x").unwrap();
        assert_eq!(card.tactic, "Post devlogs weekly");
    }

    #[test]
    fn permalink_is_always_overwritten() {
        let card = parse_card_response(CARD_JSON, "https://reddit.com/real").unwrap();
        assert_eq!(card.evidence.permalink.as_deref(), Some("https://reddit.com/real"));
    }

    #[test]
    fn array_responses_take_first_element() {
        let array = format!("[{CARD_JSON}, {{\"tactic\": \"other\"}}]");
        let card = parse_card_response(&array, "p").unwrap();
        assert_eq!(card.tactic, "Post devlogs weekly");
        assert!(parse_card_response("[]", "p").is_none());
    }

    #[test]
    fn missing_required_fields_rejects_card() {
        let no_tactic = r#"{"platform_targets": ["tiktok"], "confidence": 0.5}"#;
        assert!(parse_card_response(no_tactic, "p").is_none());
        let no_targets = r#"{"tactic": "do things", "confidence": 0.5}"#;
        assert!(parse_card_response(no_targets, "p").is_none());
    }

    #[test]
    fn snippets_are_capped_at_twenty_words() {
        let long_snippet = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let json = format!(
            r#"{{"platform_targets": ["steam"], "tactic": "t", "evidence": {{"quote_snippets": ["{long_snippet}"]}}}}"#
        );
        let card = parse_card_response(&json, "p").unwrap();
        let snippet = &card.evidence.quote_snippets[0];
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.trim_end_matches("...").split_whitespace().count(), 20);
    }

    #[test]
    fn garbage_is_no_card() {
        assert!(parse_card_response("the post says to do marketing", "p").is_none());
    }

    #[tokio::test]
    async fn mock_provider_produces_a_card() {
        let extractor = StrategyExtractor::with_client(Arc::new(MockClient::strategy_card()));
        let card = extractor
            .extract("Launch tips", "Use wishlists.", &[], "https://reddit.com/x")
            .await
            .unwrap();
        assert!(!card.platform_targets.is_empty());
        assert_eq!(card.evidence.permalink.as_deref(), Some("https://reddit.com/x"));
    }

    #[tokio::test]
    async fn null_client_declines() {
        let extractor = StrategyExtractor::with_client(Arc::new(MockClient::null()));
        assert!(extractor.extract("t", "b", &[], "p").await.is_none());
    }

    #[tokio::test]
    async fn disabled_extractor_returns_none() {
        let extractor = StrategyExtractor::disabled();
        assert!(extractor.extract("t", "b", &[], "p").await.is_none());
    }
}
