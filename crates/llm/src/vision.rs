//! Image understanding collaborator.

use async_trait::async_trait;
use safespace_common::{ImagePayload, Result, SafeSpaceError};
use serde::Serialize;
use tracing::debug;

use crate::openai::{OpenAiResponse, DEFAULT_BASE_URL};

/// Describes an image given an instruction prompt.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe(&self, image: &ImagePayload, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

/// OpenAI chat-completions client sending the image inline as a
/// `data:` URL.
pub struct OpenAiVisionClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    http_client: reqwest::Client,
}

impl OpenAiVisionClient {
    pub fn new(
        base_url: Option<String>,
        model: String,
        api_key: Option<String>,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            api_key,
            max_tokens,
            http_client: reqwest::Client::new(),
        }
    }

    fn build_request_body(&self, image: &ImagePayload, prompt: &str) -> VisionRequest {
        VisionRequest {
            model: self.model.clone(),
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn describe(&self, image: &ImagePayload, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(image, prompt);

        debug!(
            model = %self.model,
            mime = %image.mime,
            image_bytes = image.bytes.len(),
            "Vision request"
        );

        let mut http_req = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| SafeSpaceError::Vision(format!("Vision request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SafeSpaceError::Vision(format!(
                "Vision API error {status}: {body_text}"
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| SafeSpaceError::Vision(format!("Failed to parse vision response: {e}")))?;

        let response = parsed
            .into_llm_response("vision")
            .map_err(|e| SafeSpaceError::Vision(e.to_string()))?;

        Ok(response.content.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
