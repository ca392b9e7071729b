//! Document retrieval for the health specialist.
//!
//! A single reference document (the medical encyclopedia PDF) is split
//! into overlapping chunks, embedded, and kept as an on-disk similarity
//! index. Questions are answered by stuffing the closest chunks into one
//! completion prompt.
//!
//! # Architecture
//!
//! ```text
//! source document ──► RecursiveSplitter ──► Embedder ──► VectorIndex (JSON on disk)
//!                                                            │
//!                              IndexStore (build at most once per process)
//!                                                            │
//! question ──► Embedder ──► top-k chunks ──► DocumentQa ──► LlmClient
//! ```

pub mod embedding;
pub mod index;
pub mod loader;
pub mod qa;
pub mod splitter;
pub mod store;
pub mod types;

use async_trait::async_trait;
use safespace_common::Result;

pub use embedding::{Embedder, EmbeddingService};
pub use index::{IndexedChunk, ScoredChunk, VectorIndex};
pub use loader::load_source;
pub use qa::DocumentQa;
pub use splitter::RecursiveSplitter;
pub use store::IndexStore;
pub use types::RetrievalConfig;

/// Answers a question against the reference document.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String>;
}

/// Index store plus question answering, the production retriever.
pub struct RetrievalService {
    store: IndexStore,
    qa: DocumentQa,
}

impl RetrievalService {
    pub fn new(store: IndexStore, qa: DocumentQa) -> Self {
        Self { store, qa }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }
}

#[async_trait]
impl DocumentRetriever for RetrievalService {
    async fn answer(&self, question: &str) -> Result<String> {
        let index = self.store.get_or_build().await?;
        self.qa.answer(&index, question).await
    }
}
