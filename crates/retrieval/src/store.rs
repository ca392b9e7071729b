//! Build-or-load lifecycle for the similarity index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use safespace_common::{Result, SafeSpaceError};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::loader::load_source;
use crate::splitter::RecursiveSplitter;
use crate::types::RetrievalConfig;

/// Result of one build attempt, published to every waiting caller.
type BuildOutcome = Option<std::result::Result<Arc<VectorIndex>, String>>;

enum BuildState {
    Idle,
    Building(watch::Receiver<BuildOutcome>),
    Ready(Arc<VectorIndex>),
}

/// Owns the process-wide index.
///
/// The first caller loads the persisted artifact, or builds and persists it
/// when absent. The attempt runs on its own task, so a caller that stops
/// waiting (timeout, dropped request) does not cancel it. Concurrent callers
/// wait on that single attempt. A failed attempt is not cached; the next
/// caller retries.
pub struct IndexStore {
    shared: Arc<StoreShared>,
}

struct StoreShared {
    config: RetrievalConfig,
    embedder: Arc<dyn Embedder>,
    builds: AtomicUsize,
    state: Mutex<BuildState>,
}

impl IndexStore {
    pub fn new(config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            shared: Arc::new(StoreShared {
                config,
                embedder,
                builds: AtomicUsize::new(0),
                state: Mutex::new(BuildState::Idle),
            }),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.shared.config
    }

    /// Number of full builds (split + embed) performed so far.
    pub fn build_count(&self) -> usize {
        self.shared.builds.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.lock_state(), BuildState::Ready(_))
    }

    pub async fn get_or_build(&self) -> Result<Arc<VectorIndex>> {
        let mut rx = {
            let mut state = self.shared.lock_state();
            match &*state {
                BuildState::Ready(index) => return Ok(index.clone()),
                // A closed channel means the build task died without reporting.
                BuildState::Building(rx) if rx.has_changed().is_ok() => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *state = BuildState::Building(rx.clone());
                    tokio::spawn(self.shared.clone().run_build(tx));
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SafeSpaceError::Retrieval("Index build task ended without a result".into()))?;
        match &*outcome {
            Some(Ok(index)) => Ok(index.clone()),
            Some(Err(message)) => Err(SafeSpaceError::Retrieval(message.clone())),
            None => Err(SafeSpaceError::Retrieval("Index build produced no result".into())),
        }
    }
}

impl StoreShared {
    fn lock_state(&self) -> MutexGuard<'_, BuildState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_build(self: Arc<Self>, tx: watch::Sender<BuildOutcome>) {
        let outcome = match self.load_or_build().await {
            Ok(index) => Ok(Arc::new(index)),
            Err(SafeSpaceError::Retrieval(message)) => Err(message),
            Err(e) => Err(e.to_string()),
        };

        *self.lock_state() = match &outcome {
            Ok(index) => BuildState::Ready(index.clone()),
            Err(message) => {
                warn!(error = %message, "Similarity index build failed");
                BuildState::Idle
            }
        };
        // Every caller may have given up already.
        let _ = tx.send(Some(outcome));
    }

    async fn load_or_build(&self) -> Result<VectorIndex> {
        let path = &self.config.index_path;
        if path.exists() {
            match VectorIndex::load(path) {
                Ok(index) if index.embedding_model == self.embedder.model_id() => {
                    return Ok(index);
                }
                Ok(index) => warn!(
                    path = %path.display(),
                    stored = %index.embedding_model,
                    configured = %self.embedder.model_id(),
                    "Index built with a different embedding model, rebuilding"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "Unreadable index, rebuilding"),
            }
        }
        self.build().await
    }

    #[instrument(skip(self), fields(source = %self.config.source_document.display()))]
    async fn build(&self) -> Result<VectorIndex> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        info!("Building similarity index");

        let source = self.config.source_document.clone();
        let text = tokio::task::spawn_blocking(move || load_source(&source))
            .await
            .map_err(|e| SafeSpaceError::Retrieval(format!("Loader task failed: {}", e)))??;

        let splitter = RecursiveSplitter::new(self.config.chunk_size, self.config.chunk_overlap);
        let chunks = splitter.split(&text);
        if chunks.is_empty() {
            return Err(SafeSpaceError::Retrieval(format!(
                "No text extracted from {}",
                self.config.source_document.display()
            )));
        }

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size.max(1)) {
            embeddings.extend(self.embedder.embed_batch(batch).await?);
        }

        let index = VectorIndex::new(
            self.config.source_document.display().to_string(),
            self.embedder.model_id(),
            chunks,
            embeddings,
        )?;
        index.save(&self.config.index_path)?;

        info!(chunks = index.len(), dimension = index.dimension, "Similarity index built");
        Ok(index)
    }
}
