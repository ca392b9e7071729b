//! Triage-and-dispatch core for SafeSpace.
//!
//! The coordinator is the central brain that:
//! 1. Receives a user request (text, optionally an image)
//! 2. Asks a routing model which specialist capabilities should answer
//! 3. Runs the selected handlers concurrently, one output slot each
//! 4. Synthesizes the populated slots into one reply
//!
//! # Architecture
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────┐
//! │  Router  │  ◄── routing model (JSON list of capabilities)
//! └────┬─────┘
//!      │ RoutingDecision
//!  ┌───┴────────┬──────────┬────────────┬─────────────┐
//!  ▼            ▼          ▼            ▼             ▼
//! [mental]  [emergency] [therapist] [health]     [vision]
//!  │            │          │            │             │
//!  └───────────┬┴──────────┴────────────┴─────────────┘
//!              ▼ OutputSlots (join barrier)
//!        ┌────────────┐
//!        │ Aggregator │  ◄── synthesis model
//!        └────────────┘
//! ```

pub mod aggregator;
pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod slots;

pub use aggregator::{build_digest, Aggregator, FALLBACK_RESPONSE};
pub use capability::Capability;
pub use config::{CoordinatorConfig, EmergencyConfig, TimeoutConfig};
pub use dispatcher::Dispatcher;
pub use handlers::{
    failure_text, EmergencyHandler, FindTherapistHandler, Handler, HandlerError, HandlerOutcome,
    HealthSpecialistHandler, MentalSpecialistHandler, SamplingParams, VisionAnalysisHandler,
    EMERGENCY_REASSURANCE, NO_IMAGE_SENTINEL, THERAPIST_DIRECTORY,
};
pub use notify::{LoggingNotifier, Notifier, TwilioNotifier};
pub use pipeline::{Coordinator, PipelineOutcome, PipelineStage};
pub use registry::HandlerRegistry;
pub use router::{parse_decision, Router, RoutingDecision};
pub use slots::{OutputSlots, SlotError};
