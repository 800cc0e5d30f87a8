pub mod parse;

pub use parse::{extract_json, extract_score, Parsed};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::LlmOptions;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(String),
    #[error("LLM returned HTTP {0}")]
    Http(u16),
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM returned an empty response")]
    Empty,
}

/// The three model roles the core distinguishes. Tiers map to configured
/// model names; nothing else about the call changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Intent,
    Analysis,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Intent => "intent",
            ModelTier::Analysis => "analysis",
        }
    }
}

/// One generation request. `system` frames the task, `prompt` carries it.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub prompt: String,
    pub tier: ModelTier,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(tier: ModelTier, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        GenerateRequest {
            system: system.into(),
            prompt: prompt.into(),
            tier,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Capability interface for text generation. Implementations own their
/// retries; the core treats one call as succeeding once or failing once.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError>;
}

// --- Ollama-backed client ---

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// LLM client for a local Ollama server's `/api/chat` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    options: LlmOptions,
}

impl OllamaClient {
    pub fn new(options: LlmOptions) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_s))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(OllamaClient { client, options })
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.options.fast_model,
            ModelTier::Intent => &self.options.intent_model,
            ModelTier::Analysis => &self.options.analysis_model,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let model = self.model_for(request.tier);
        let payload = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "stream": false,
            "options": {
                "temperature": request.temperature.unwrap_or(self.options.temperature),
                "num_predict": request.max_tokens.unwrap_or(self.options.max_tokens),
            },
        });

        let url = format!("{}/api/chat", self.options.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Http(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = body.message.map(|m| m.content).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Empty);
        }

        tracing::debug!(model = %model, tier = request.tier.as_str(), chars = content.len(), "LLM call complete");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options_for(server: &MockServer) -> LlmOptions {
        LlmOptions {
            host: server.uri(),
            ..LlmOptions::default()
        }
    }

    #[tokio::test]
    async fn test_generate_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "{\"score\": 0.9}"}
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(options_for(&server)).unwrap();
        let content = client
            .generate(GenerateRequest::new(ModelTier::Fast, "system", "prompt"))
            .await
            .unwrap();
        assert_eq!(content, "{\"score\": 0.9}");
    }

    #[tokio::test]
    async fn test_generate_maps_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = OllamaClient::new(options_for(&server)).unwrap();
        let err = client
            .generate(GenerateRequest::new(ModelTier::Analysis, "s", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Http(500)));
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "  "}
            })))
            .mount(&server)
            .await;

        let client = OllamaClient::new(options_for(&server)).unwrap();
        let err = client
            .generate(GenerateRequest::new(ModelTier::Fast, "s", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Empty));
    }
}
