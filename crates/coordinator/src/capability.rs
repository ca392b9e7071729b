//! The closed set of specialist capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One specialist responder.
///
/// Declaration order is the digest priority order, so `Ord` (and any
/// `BTreeSet`/`BTreeMap` keyed by capability) yields mental, emergency,
/// nearby therapists, medical, image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    MentalSpecialist,
    Emergency,
    FindTherapist,
    HealthSpecialist,
    VisionAnalysis,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::MentalSpecialist,
        Capability::Emergency,
        Capability::FindTherapist,
        Capability::HealthSpecialist,
        Capability::VisionAnalysis,
    ];

    /// Used whenever the router cannot produce a usable decision.
    pub const DEFAULT: Capability = Capability::MentalSpecialist;

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::MentalSpecialist => "mental_specialist",
            Capability::Emergency => "emergency",
            Capability::FindTherapist => "find_therapist",
            Capability::HealthSpecialist => "health_specialist",
            Capability::VisionAnalysis => "vision_analysis",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Section header used in the synthesis digest.
    pub fn header(&self) -> &'static str {
        match self {
            Capability::MentalSpecialist => "🧠 Mental Health",
            Capability::Emergency => "🚨 Emergency",
            Capability::FindTherapist => "📍 Nearby Therapists",
            Capability::HealthSpecialist => "💊 Medical Info",
            Capability::VisionAnalysis => "🖼️ Image Insight",
        }
    }

    /// Trigger condition shown to the routing model.
    pub fn trigger(&self) -> &'static str {
        match self {
            Capability::MentalSpecialist => "for stress, emotions, focus issues",
            Capability::Emergency => "if there's any suicide, harm, or urgent help signal",
            Capability::FindTherapist => "if user asks for professional therapist nearby",
            Capability::HealthSpecialist => "for physical symptoms or illness",
            Capability::VisionAnalysis => "if the user uploads a medical image",
        }
    }

    pub fn requires_image(&self) -> bool {
        matches!(self, Capability::VisionAnalysis)
    }

    /// Emergency handling carries an external side effect.
    pub fn is_emergency(&self) -> bool {
        matches!(self, Capability::Emergency)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown capability: {s}"))
    }
}
