//! Common types shared across SafeSpace crates.
//!
//! This crate holds the per-request data model and the error taxonomy
//! that the collaborators and the triage core agree on.

pub mod error;
pub mod message;

pub use error::{Result, SafeSpaceError};
pub use message::{ImagePayload, Request};
