use anyhow::Result;
use async_trait::async_trait;

use crate::traits::{ChatClient, ChatRequest};

/// Canned-response client for tests and the `mock` provider setting.
pub struct MockClient {
    response: String,
}

impl MockClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }

    /// A mock that answers every prompt with a plausible strategy card.
    pub fn strategy_card() -> Self {
        Self::new(
            r#"{
  "platform_targets": ["tiktok", "instagram"],
  "niche": "indie games",
  "tactic": "Use vertical slice gameplay loops",
  "steps": [
    {"step": 1, "action": "Record 15s of core loop"},
    {"step": 2, "action": "Add trending audio"}
  ],
  "preconditions": {"needs_gameplay_footage": true},
  "metrics": {"primary": "retention_rate", "secondary": ["shares"]},
  "risks": ["low_quality_footage"],
  "confidence": 0.85,
  "evidence": {
    "quote_snippets": ["vertical slice is key", "trending audio helps"]
  }
}"#,
        )
    }

    /// A mock that always declines to extract.
    pub fn null() -> Self {
        Self::new("null")
    }
}

#[async_trait]
impl ChatClient for MockClient {
    async fn chat(&self, _request: ChatRequest) -> Result<String> {
        Ok(self.response.clone())
    }
}
