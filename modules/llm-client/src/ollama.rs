use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::traits::{ChatClient, ChatRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat client for a local Ollama server (`/api/chat`, non-streaming).
pub struct OllamaClient {
    host: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str) -> Self {
        Self::with_timeout(host, model, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(host: &str, model: &str, timeout: Duration) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn chat(&self, request: ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.host);

        let payload = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        debug!(model = %self.model, host = %self.host, "Ollama chat request");

        let response = self.http.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error ({status}): {error_text}"));
        }

        let parsed: OllamaResponse = response.json().await?;
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }
}
