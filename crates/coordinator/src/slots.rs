//! Per-request output slots.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::capability::Capability;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot for {0} was already written")]
    AlreadyWritten(Capability),
}

/// One text slot per capability, each written at most once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputSlots {
    slots: BTreeMap<Capability, String>,
}

impl OutputSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, capability: Capability, text: impl Into<String>) -> Result<(), SlotError> {
        if self.slots.contains_key(&capability) {
            return Err(SlotError::AlreadyWritten(capability));
        }
        self.slots.insert(capability, text.into());
        Ok(())
    }

    pub fn get(&self, capability: Capability) -> Option<&str> {
        self.slots.get(&capability).map(String::as_str)
    }

    /// Slots holding non-blank text, in digest priority order.
    pub fn populated(&self) -> impl Iterator<Item = (Capability, &str)> + '_ {
        self.slots
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(cap, text)| (*cap, text.as_str()))
    }

    pub fn is_populated(&self, capability: Capability) -> bool {
        self.get(capability).is_some_and(|t| !t.trim().is_empty())
    }

    /// Number of written slots, blank or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
