//! Text embeddings for the similarity index.
//!
//! [`EmbeddingService`] wraps fastembed with a lazily loaded model. The
//! [`Embedder`] trait is the seam the index store and QA chain use, so tests
//! can swap in a deterministic embedder.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;
use safespace_common::{Result, SafeSpaceError};
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embeddings: {0}")]
    Generation(String),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl From<EmbeddingError> for SafeSpaceError {
    fn from(err: EmbeddingError) -> Self {
        SafeSpaceError::Retrieval(err.to_string())
    }
}

/// Produces vectors for chunks and questions.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SafeSpaceError::Retrieval("Empty embedding result".into()))
    }

    /// Identifier stored alongside the index, so an index built with one
    /// model is never queried with another.
    fn model_id(&self) -> &str;
}

/// fastembed-backed embedder. The model is loaded on first use, on the
/// blocking pool.
pub struct EmbeddingService {
    model_id: String,
    model_name: EmbeddingModel,
    model: Arc<OnceCell<TextEmbedding>>,
}

impl EmbeddingService {
    pub fn new(model_id: impl Into<String>, model_name: EmbeddingModel) -> Self {
        Self {
            model_id: model_id.into(),
            model_name,
            model: Arc::new(OnceCell::new()),
        }
    }

    /// Creates an embedding service from a model name string. Either
    /// spelling of a model yields the same canonical id.
    pub fn from_model_str(model_name: &str) -> std::result::Result<Self, EmbeddingError> {
        let (model_id, model) = match model_name {
            "all-MiniLM-L6-v2" | "AllMiniLML6V2" => ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2),
            "all-MiniLM-L12-v2" | "AllMiniLML12V2" => {
                ("all-MiniLM-L12-v2", EmbeddingModel::AllMiniLML12V2)
            }
            "bge-small-en-v1.5" | "BGESmallENV15" => ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "BGEBaseENV15" => ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" | "BGELargeENV15" => ("bge-large-en-v1.5", EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" | "NomicEmbedTextV15" => {
                ("nomic-embed-text-v1.5", EmbeddingModel::NomicEmbedTextV15)
            }
            _ => {
                return Err(EmbeddingError::ModelInit(format!(
                    "Unknown embedding model: '{}'. Supported models: all-MiniLM-L6-v2, all-MiniLM-L12-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
                    model_name
                )));
            }
        };
        Ok(Self::new(model_id, model))
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }
}

/// Loads the model. Blocking: downloads weights on first run and builds the
/// ONNX session.
fn init_model(
    model_id: &str,
    model_name: EmbeddingModel,
) -> std::result::Result<TextEmbedding, EmbeddingError> {
    info!(model = %model_id, "Initializing embedding model");

    let options = InitOptions::new(model_name).with_show_download_progress(true);
    let model =
        TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

    info!(model = %model_id, "Embedding model initialized");
    Ok(model)
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    #[instrument(skip(self, texts), fields(batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let cell = self.model.clone();
        let model_id = self.model_id.clone();
        let model_name = self.model_name.clone();
        let texts = texts.to_vec();

        // fastembed is synchronous, model loading included
        let embeddings = task::spawn_blocking(move || {
            let model = cell.get_or_try_init(|| init_model(&model_id, model_name))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(EmbeddingError::from)??;

        debug!(
            batch_size = embeddings.len(),
            dimension = embeddings.first().map(|e| e.len()).unwrap_or(0),
            "Generated batch embeddings"
        );

        Ok(embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
