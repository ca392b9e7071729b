//! Fan-in: digest the populated slots and synthesize one reply.

use std::sync::Arc;

use safespace_llm::{LlmClient, LlmRequest};
use tracing::{debug, info, warn};

use crate::slots::OutputSlots;

/// Default sampling temperature for synthesis.
pub const SYNTHESIS_TEMPERATURE: f32 = 0.5;

const COMBINE_INSTRUCTION: &str =
    "You are a supportive assistant. Combine the following into a clear, friendly response:";

/// Returned when there is nothing to synthesize or synthesis fails.
pub const FALLBACK_RESPONSE: &str = "I'm here for you, but I couldn't put together a full answer right now. \
Please try again in a moment. If you feel unsafe, reach out to someone you trust or your local emergency number.";

/// Labeled sections for every populated slot, in priority order.
pub fn build_digest(slots: &OutputSlots) -> String {
    slots
        .populated()
        .map(|(capability, text)| format!("{}:\n{}", capability.header(), text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(digest: &str) -> String {
    format!("{COMBINE_INSTRUCTION}\n\n{digest}")
}

pub struct Aggregator {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
}

impl Aggregator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: SYNTHESIS_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// One synthesis call over the digest. Always returns non-empty text.
    pub async fn aggregate(&self, slots: &OutputSlots) -> String {
        let digest = build_digest(slots);
        if digest.is_empty() {
            warn!("No populated slots, returning fallback response");
            return FALLBACK_RESPONSE.to_string();
        }
        debug!(digest_len = digest.len(), "Built synthesis digest");

        let request = LlmRequest::prompt(build_prompt(&digest)).with_temperature(self.temperature);
        match self.llm.complete(request).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.is_empty() {
                    warn!(model = %response.model, "Synthesis returned empty text, using fallback");
                    return FALLBACK_RESPONSE.to_string();
                }
                info!(response_len = text.len(), "Synthesis complete");
                text.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Synthesis call failed, using fallback");
                FALLBACK_RESPONSE.to_string()
            }
        }
    }
}
