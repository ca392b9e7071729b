//! Ollama chat client for the local specialist model.
//!
//! The specialist model (MedGemma by default) runs under Ollama at
//! `http://localhost:11434`. Sampling parameters travel in the `options`
//! object: `temperature`, `top_p`, and `num_predict` for the token cap.

use async_trait::async_trait;
use safespace_common::{Result, SafeSpaceError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
}

#[derive(Debug, Default, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.num_predict.is_none()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    model: Option<String>,
    message: OllamaMessage,
    #[serde(default)]
    done_reason: Option<String>,
}

pub struct OllamaClient {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, model: String) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            http_client: reqwest::Client::new(),
        }
    }

    fn build_request_body(&self, request: &LlmRequest) -> OllamaRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system_prompt {
            messages.push(OllamaMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| OllamaMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));

        OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request_body(&request);

        debug!(
            model = %self.model,
            messages = body.messages.len(),
            total_chars = body.messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Ollama chat request"
        );

        let start = std::time::Instant::now();
        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    SafeSpaceError::Llm(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    SafeSpaceError::Llm(format!("Ollama request failed: {e}"))
                }
            })?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ollama response received"
        );

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SafeSpaceError::Llm(format!(
                "Ollama API error {status}: {body_text}"
            )));
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| SafeSpaceError::Llm(format!("Failed to parse Ollama response: {e}")))?;

        Ok(LlmResponse {
            content: parsed.message.content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            usage: None,
            finish_reason: parsed.done_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
