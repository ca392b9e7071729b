use std::time::Duration;

use async_trait::async_trait;
use safespace_common::{ImagePayload, Result, SafeSpaceError};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::vision::VisionClient;

/// Bounds every collaborator call. An elapsed deadline surfaces as
/// `SafeSpaceError::Timeout`, which callers treat like any other failure.
pub struct TimeoutClient<T> {
    inner: T,
    timeout: Duration,
}

impl<T> TimeoutClient<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for TimeoutClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    model = %self.inner.model_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "LLM request timed out"
                );
                Err(SafeSpaceError::Timeout(self.timeout))
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[async_trait]
impl<T: VisionClient> VisionClient for TimeoutClient<T> {
    async fn describe(&self, image: &ImagePayload, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.inner.describe(image, prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    model = %self.inner.model_name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Vision request timed out"
                );
                Err(SafeSpaceError::Timeout(self.timeout))
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
