use async_trait::async_trait;
use safespace_common::{Result, SafeSpaceError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, TokenUsage};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiResponse {
    /// Take the first choice's text. Used by both the chat and vision
    /// clients since they share the response shape.
    pub(crate) fn into_llm_response(self, provider: &str) -> Result<LlmResponse> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            SafeSpaceError::Llm(format!("No choices in {provider} response"))
        })?;

        let content = choice
            .message
            .content
            .ok_or_else(|| SafeSpaceError::Llm(format!("Empty message in {provider} response")))?;

        Ok(LlmResponse {
            content,
            model: self.model,
            usage: self.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }
}

/// OpenAI-compatible `/v1/chat/completions` client.
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn build_messages(request: &LlmRequest) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
            });
        }
        for msg in &request.messages {
            messages.push(OpenAiMessage {
                role: msg.role.as_str().to_string(),
                content: Some(msg.content.clone()),
            });
        }
        messages
    }

    fn build_request_body(&self, request: &LlmRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        debug!(model = %self.model, messages = body.messages.len(), "OpenAI completion request");

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| SafeSpaceError::Llm(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SafeSpaceError::Llm(format!(
                "OpenAI API error {status}: {body_text}"
            )));
        }

        let oai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| SafeSpaceError::Llm(format!("Failed to parse OpenAI response: {e}")))?;

        oai_response.into_llm_response("OpenAI")
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
