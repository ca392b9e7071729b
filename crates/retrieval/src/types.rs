//! Retrieval configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Reference document the index is built from (PDF or plain text)
    #[serde(default = "default_source_document")]
    pub source_document: PathBuf,

    /// Where the similarity index artifact lives
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks stuffed into the answer prompt
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// fastembed model name
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Texts per embedding batch while building
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

fn default_source_document() -> PathBuf {
    PathBuf::from("data/The_GALE_ENCYCLOPEDIA_of_MEDICINE_SECOND.pdf")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/medical_index.json")
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_top_k() -> usize {
    4
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".into()
}

fn default_embed_batch_size() -> usize {
    64
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            source_document: default_source_document(),
            index_path: default_index_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            embedding_model: default_embedding_model(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}
