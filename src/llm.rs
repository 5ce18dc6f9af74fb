//! LLM answer generation behind a narrow provider interface.
//!
//! The retriever treats the LLM as a black-box request/response capability.
//! [`LlmClient`] adds the daily query quota: checked before the call,
//! recorded after success, never retried.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::quota::QuotaCounter;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Generate an answer for an assembled prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChatProvider::new(config)?)),
        "mock" => Ok(Box::new(MockLlm)),
        other => Err(Error::Config(format!("unknown llm provider: {other}"))),
    }
}

pub struct LlmClient {
    provider: Box<dyn LlmProvider>,
    quota: QuotaCounter,
}

impl LlmClient {
    pub fn new(provider: Box<dyn LlmProvider>, quota: QuotaCounter) -> Self {
        Self { provider, quota }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// One generation counts as one quota unit.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        self.quota.check(1).await?;
        let answer = self.provider.generate(prompt).await?;
        self.quota.record(1).await?;
        Ok(answer)
    }
}

// ============ OpenAI chat provider ============

pub struct OpenAiChatProvider {
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiChatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("llm.model required for openai".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self {
            model,
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| Error::Llm(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("API error {status}: {body_text}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Llm("invalid response: missing message content".into()))
    }
}

// ============ Mock provider ============

/// Deterministic provider for tests and offline runs: echoes a short
/// acknowledgement of the prompt rather than generating text.
pub struct MockLlm;

#[async_trait]
impl LlmProvider for MockLlm {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(format!(
            "Answer based on the provided context ({} prompt chars).",
            prompt.len()
        ))
    }
}
