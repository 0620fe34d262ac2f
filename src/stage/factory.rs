//! Stage kind → constructor map.

use crate::config::StageConfig;
use crate::error::{EngineError, Result};
use crate::stage::builtin::{PassThrough, PulseFinder, SampleAnalysis};
use crate::stage::{Stage, StageSlot};
use std::collections::HashMap;

/// Builds a stage from its configuration.
pub type StageConstructor = fn(&StageConfig) -> Result<Box<dyn Stage>>;

/// Registry of stage kinds.
#[derive(Clone)]
pub struct StageFactory {
    constructors: HashMap<String, StageConstructor>,
}

impl StageFactory {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Factory with the built-in stages.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(PassThrough::KIND, PassThrough::from_config);
        factory.register(SampleAnalysis::KIND, SampleAnalysis::from_config);
        factory.register(PulseFinder::KIND, PulseFinder::from_config);
        factory
    }

    /// Register (or replace) a kind.
    pub fn register(&mut self, kind: &str, constructor: StageConstructor) {
        if self
            .constructors
            .insert(kind.to_string(), constructor)
            .is_some()
        {
            tracing::debug!("Stage kind '{}' re-registered", kind);
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Construct a fresh stage for `config`.
    pub fn create(&self, config: &StageConfig) -> Result<Box<dyn Stage>> {
        let constructor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| EngineError::UnknownStageKind(config.kind.clone()))?;
        constructor(config)
    }

    /// Construct a fresh stage wrapped in its slot.
    pub fn create_slot(&self, config: &StageConfig) -> Result<StageSlot> {
        Ok(StageSlot::new(self.create(config)?, config.clone()))
    }
}

impl std::fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for StageFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let factory = StageFactory::with_builtins();
        assert_eq!(factory.kinds(), vec!["PassThrough", "PulseFinder", "SampleAnalysis"]);
    }

    #[test]
    fn test_create_slot() {
        let factory = StageFactory::with_builtins();
        let slot = factory
            .create_slot(&StageConfig::new("PulseFinder", "pf"))
            .unwrap();
        assert_eq!(slot.name(), "pf");
        assert_eq!(slot.kind(), "PulseFinder");
        assert_eq!(slot.input_type(), "SampleEvent");
        assert_eq!(slot.output_type(), "PulseEvent");
    }

    #[test]
    fn test_unknown_kind() {
        let factory = StageFactory::with_builtins();
        let result = factory.create(&StageConfig::new("DriftSimulation", ""));
        assert!(matches!(result, Err(EngineError::UnknownStageKind(k)) if k == "DriftSimulation"));
    }
}
