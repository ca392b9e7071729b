//! Persisted similarity index over document chunks.

use std::cmp::Ordering;
use std::path::Path;

use safespace_common::{Result, SafeSpaceError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk<'a> {
    pub text: &'a str,
    pub score: f32,
}

/// Chunks with their embeddings, tagged with the document and model that
/// produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    pub source: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub chunks: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn new(
        source: impl Into<String>,
        embedding_model: impl Into<String>,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if texts.len() != embeddings.len() {
            return Err(SafeSpaceError::Retrieval(format!(
                "Embedding count mismatch: {} chunks, {} embeddings",
                texts.len(),
                embeddings.len()
            )));
        }

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(SafeSpaceError::Retrieval(format!(
                "Inconsistent embedding dimension: expected {}, got {}",
                dimension,
                bad.len()
            )));
        }

        let chunks = texts
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| IndexedChunk { text, embedding })
            .collect();

        Ok(Self {
            source: source.into(),
            embedding_model: embedding_model.into(),
            dimension,
            chunks,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns up to `k` chunks ordered by descending cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk<'_>> {
        let mut scored: Vec<ScoredChunk<'_>> = self
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                text: &chunk.text,
                score: cosine_similarity(query, &chunk.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        debug!(returned = scored.len(), "Similarity search complete");
        scored
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let index: Self = serde_json::from_slice(&bytes)?;
        info!(path = %path.display(), chunks = index.len(), "Loaded similarity index");
        Ok(index)
    }

    /// Writes to a sibling temp file and renames, so readers never observe a
    /// partially written index.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, path)?;
        info!(path = %path.display(), chunks = self.len(), "Saved similarity index");
        Ok(())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
