//! Seam between the decision engine and the language-model provider.
//!
//! The engine only needs "prompt in, text out with a timeout"; the provider
//! wire protocol stays behind this trait.

use async_trait::async_trait;
use cortex_common::settings::LlmSettings;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm api key not configured")]
    MissingApiKey,

    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("llm response malformed: {0}")]
    Malformed(String),

    #[error("llm call timed out after {0}s")]
    Timeout(u64),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Messages-API client for the configured model.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    settings: LlmSettings,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.anthropic.com".to_string(),
            settings,
        }
    }

    pub fn with_base_url(settings: LlmSettings, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            settings,
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        let body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();

        let response = tokio::time::timeout(Duration::from_secs(self.settings.timeout), request)
            .await
            .map_err(|_| LlmError::Timeout(self.settings.timeout))??
            .error_for_status()?;

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| LlmError::Malformed("empty content".to_string()))?;

        Ok(text)
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted model used across the decision-engine tests.

    use super::*;
    use std::sync::Mutex;

    pub struct ScriptedModel {
        responses: Mutex<Vec<Result<String, String>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always(response: &str) -> Self {
            Self::new(vec![Ok(response.to_string())])
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses
                    .first()
                    .cloned()
                    .unwrap_or(Err("no scripted response".to_string()))
            };
            next.map_err(LlmError::Malformed)
        }
    }
}
