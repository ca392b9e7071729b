//! Application state for the API server.

use safespace_coordinator::{Coordinator, CoordinatorConfig};
use safespace_llm::{build_vision_client, VisionClient};
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    /// Routes and answers `/ask`
    pub coordinator: Arc<Coordinator>,

    /// Describes uploaded images
    pub vision: Arc<dyn VisionClient>,

    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, vision: Arc<dyn VisionClient>) -> Self {
        Self {
            coordinator,
            vision,
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the coordinator and the upload vision client from configuration.
    pub fn from_config(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        let coordinator = Coordinator::from_config(config)?;
        let vision = build_vision_client(&config.vision, config.timeouts.collaborator())?;
        Ok(Self::new(Arc::new(coordinator), vision))
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
