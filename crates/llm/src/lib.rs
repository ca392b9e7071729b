//! Collaborator clients for SafeSpace.
//!
//! Text completion (routing, synthesis), specialist chat (local Ollama
//! model) and image understanding all sit behind the traits in this
//! crate so the triage core can be driven by fakes in tests.

pub mod client;
pub mod config;
pub mod ollama;
pub mod openai;
pub mod timeout;
pub mod vision;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, build_vision_client, LlmConfig, SemaphoredClient};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use timeout::TimeoutClient;
pub use vision::{OpenAiVisionClient, VisionClient};
