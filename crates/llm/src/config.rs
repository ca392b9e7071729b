use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use safespace_common::{Result, SafeSpaceError};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::timeout::TimeoutClient;
use crate::vision::{OpenAiVisionClient, VisionClient};

/// Provider settings for one collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "ollama"
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent() -> usize {
    4
}

impl LlmConfig {
    pub fn openai(model: impl Into<String>) -> Self {
        Self {
            provider: "openai".into(),
            model: model.into(),
            api_key: None,
            api_url: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            max_concurrent_requests: default_max_concurrent(),
        }
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        Self {
            provider: "ollama".into(),
            ..Self::openai(model)
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Resolve the API key from config, then from `OPENAI_API_KEY` for
    /// the openai provider. Ollama needs none.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        match self.provider.as_str() {
            "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        }
    }
}

pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| SafeSpaceError::Llm(format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build a text client: provider, then a per-call timeout, then a
/// concurrency cap.
pub fn build_llm_client(config: &LlmConfig, timeout: Duration) -> Result<Arc<dyn LlmClient>> {
    let base_client: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" => Box::new(OpenAiClient::new(
            config.api_url.clone(),
            config.model.clone(),
            config.resolve_api_key(),
        )),
        "ollama" => Box::new(OllamaClient::new(
            config.api_url.clone(),
            config.model.clone(),
        )),
        other => {
            return Err(SafeSpaceError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    let bounded: Arc<dyn LlmClient> = Arc::new(TimeoutClient::new(base_client, timeout));

    Ok(Arc::new(SemaphoredClient::new(
        bounded,
        config.max_concurrent_requests,
    )))
}

/// Build the image-understanding client. Only OpenAI-compatible vision
/// endpoints are supported.
pub fn build_vision_client(
    config: &LlmConfig,
    timeout: Duration,
) -> Result<Arc<dyn VisionClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(TimeoutClient::new(
            OpenAiVisionClient::new(
                config.api_url.clone(),
                config.model.clone(),
                config.resolve_api_key(),
                config.max_tokens,
            ),
            timeout,
        ))),
        other => Err(SafeSpaceError::Config(format!(
            "Unsupported vision provider: {other}"
        ))),
    }
}
