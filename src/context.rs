//! Shared, explicitly constructed engine context.
//!
//! Holds the registries every worker needs: structured observable types,
//! concrete event types, and stage kinds. All three are filled before the
//! run starts and only read afterwards, so workers share them through `Arc`
//! without locking.

use crate::config::Verbosity;
use crate::event::EventRegistry;
use crate::observable::TypeRegistry;
use crate::stage::StageFactory;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EngineContext {
    pub types: Arc<TypeRegistry>,
    pub events: Arc<EventRegistry>,
    pub stages: Arc<StageFactory>,
    /// Floor for every worker's verbosity.
    pub verbosity: Verbosity,
}

impl EngineContext {
    pub fn new(types: TypeRegistry, events: EventRegistry, stages: StageFactory) -> Self {
        Self {
            types: Arc::new(types),
            events: Arc::new(events),
            stages: Arc::new(stages),
            verbosity: Verbosity::default(),
        }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(
            TypeRegistry::with_defaults(),
            EventRegistry::with_defaults(),
            StageFactory::with_builtins(),
        )
    }
}
