//! Capability to handler registry, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use safespace_common::{Result, SafeSpaceError};

use crate::capability::Capability;
use crate::handlers::Handler;

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<Capability, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.handlers.keys().copied()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("capabilities", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: BTreeMap<Capability, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    /// Registers a handler under the capability it reports.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(handler.capability(), handler);
        self
    }

    /// Fails unless every capability has a handler.
    pub fn build(self) -> Result<HandlerRegistry> {
        let missing: Vec<&str> = Capability::ALL
            .iter()
            .filter(|c| !self.handlers.contains_key(*c))
            .map(|c| c.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(SafeSpaceError::Config(format!(
                "No handler registered for: {}",
                missing.join(", ")
            )));
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }

    /// Builds without the completeness check. Unregistered capabilities
    /// surface as handler failures at dispatch time.
    pub fn build_partial(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
