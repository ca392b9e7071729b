//! "Stuff" question answering over the similarity index.

use std::sync::Arc;

use safespace_common::{Result, SafeSpaceError};
use safespace_llm::{LlmClient, LlmRequest};
use tracing::{debug, instrument};

use crate::embedding::Embedder;
use crate::index::VectorIndex;

const QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Retrieves the closest chunks and asks the LLM to answer from them.
pub struct DocumentQa {
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    temperature: f32,
}

impl DocumentQa {
    pub fn new(llm: Arc<dyn LlmClient>, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            llm,
            embedder,
            top_k: top_k.max(1),
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_prompt(context: &[&str], question: &str) -> String {
        format!(
            "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
            QA_TEMPLATE,
            context.join("\n\n"),
            question
        )
    }

    #[instrument(skip(self, index, question), fields(chunks = index.len()))]
    pub async fn answer(&self, index: &VectorIndex, question: &str) -> Result<String> {
        let query = self.embedder.embed(question).await?;
        let hits = index.search(&query, self.top_k);
        debug!(hits = hits.len(), "Retrieved context chunks");

        let context: Vec<&str> = hits.iter().map(|h| h.text).collect();
        let request = LlmRequest::prompt(Self::build_prompt(&context, question))
            .with_temperature(self.temperature);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| SafeSpaceError::Retrieval(e.to_string()))?;

        Ok(response.content.trim().to_string())
    }
}
