//! Error types for SafeSpace.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeSpaceError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SafeSpaceError>;
