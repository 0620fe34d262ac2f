//! Ordered stage chain owned by one worker.

use crate::config::{StageConfig, Verbosity};
use crate::error::{EngineError, Result, ResultExt};
use crate::event::{EventRegistry, ANY_EVENT};
use crate::observable::{ObservableTable, WorkerId};
use crate::stage::{Friends, OutputSlot, Stage, StageFactory, StageSlot};

/// Stages in processing order.
///
/// `outputs[i]` holds the output event of `slots[i]`. Keeping the event
/// storage beside the slots lets a stage borrow its upstream stage's event
/// while still seeing the other stages through [`Friends`].
#[derive(Debug, Default)]
pub struct Chain {
    slots: Vec<StageSlot>,
    outputs: Vec<OutputSlot>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build fresh stage instances for every configured stage.
    pub fn from_config(configs: &[StageConfig], factory: &StageFactory) -> Result<Self> {
        let mut chain = Self::new();
        for config in configs {
            let slot = factory
                .create_slot(config)
                .with_context(|| format!("Cannot build stage '{}'", config.display_name()))?;
            chain.push_slot(slot);
        }
        Ok(chain)
    }

    /// Append a stage.
    pub fn push(&mut self, stage: Box<dyn Stage>, config: StageConfig) {
        self.push_slot(StageSlot::new(stage, config));
    }

    pub fn push_slot(&mut self, slot: StageSlot) {
        self.slots.push(slot);
        self.outputs.push(OutputSlot::new());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[StageSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&StageSlot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut StageSlot> {
        self.slots.get_mut(index)
    }

    /// Slot by instance name.
    pub fn find(&self, name: &str) -> Option<&StageSlot> {
        self.slots.iter().find(|slot| slot.name() == name)
    }

    pub fn output(&self, index: usize) -> Option<&OutputSlot> {
        self.outputs.get(index)
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut [StageSlot], &mut [OutputSlot]) {
        (&mut self.slots, &mut self.outputs)
    }

    /// Highest verbosity of any stage.
    pub fn verbosity(&self) -> Verbosity {
        self.slots
            .iter()
            .map(StageSlot::verbosity)
            .max()
            .unwrap_or_default()
    }

    /// Whether any stage insists on running alone.
    pub fn single_thread_only(&self) -> bool {
        self.slots.iter().any(|slot| slot.stage().single_thread_only())
    }

    /// Declared output type of the last stage, or [`ANY_EVENT`] if empty.
    pub fn output_type(&self) -> &'static str {
        self.slots.last().map_or(ANY_EVENT, StageSlot::output_type)
    }

    /// Check that events can flow through the chain.
    ///
    /// Stages declaring both input and output as the wildcard are skipped.
    /// Every declared type must be registered. A first stage that does not
    /// accept `sample_input` is reported but allowed, since its events will
    /// simply be discarded. Adjacent stages whose types differ (neither being
    /// the wildcard) make the chain unusable.
    pub fn validate(&self, sample_input: &str, events: &EventRegistry) -> Result<()> {
        for slot in &self.slots {
            for tag in [slot.input_type(), slot.output_type()] {
                if !events.contains(tag) {
                    return Err(EngineError::UnknownEventType {
                        stage: slot.name().to_string(),
                        tag: tag.to_string(),
                    });
                }
            }
        }

        let typed: Vec<&StageSlot> = self
            .slots
            .iter()
            .filter(|slot| slot.input_type() != ANY_EVENT || slot.output_type() != ANY_EVENT)
            .collect();

        let Some(first) = typed.first() else {
            tracing::debug!("Chain has no typed stages, nothing to validate");
            return Ok(());
        };

        if first.input_type() != ANY_EVENT && first.input_type() != sample_input {
            tracing::error!(
                "Input event type does not match: stage '{}' expects {}, source provides {}",
                first.name(),
                first.input_type(),
                sample_input
            );
        }

        for pair in typed.windows(2) {
            let (upstream, downstream) = (pair[0], pair[1]);
            let output = upstream.output_type();
            let input = downstream.input_type();
            if output != ANY_EVENT && input != ANY_EVENT && output != input {
                return Err(EngineError::ChainMismatch {
                    upstream: upstream.name().to_string(),
                    downstream: downstream.name().to_string(),
                    output: output.to_string(),
                    input: input.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Register every stage's configured observables. Returns the total.
    pub fn register_observables(&mut self, table: &mut ObservableTable) -> usize {
        self.slots
            .iter_mut()
            .map(|slot| slot.register_observables(table))
            .sum()
    }

    /// Initialize every stage in order. Each stage sees all others as friends.
    pub fn init(&mut self, table: &mut ObservableTable, worker: WorkerId) -> Result<()> {
        for k in 0..self.slots.len() {
            let (before, rest) = self.slots.split_at_mut(k);
            let Some((slot, after)) = rest.split_first_mut() else {
                break;
            };
            let name = slot.name().to_string();
            slot.init(table, Friends::new(before, after), worker)
                .with_context(|| format!("Stage '{}' failed to initialize", name))?;
        }
        Ok(())
    }

    pub fn set_validation(&mut self, force: bool) {
        for slot in &mut self.slots {
            slot.set_validation(force);
        }
    }

    pub(crate) fn clear_outputs(&mut self) {
        for output in &mut self.outputs {
            output.clear();
        }
    }

    pub(crate) fn reset_counters(&self) {
        for slot in &self.slots {
            slot.counters().reset();
        }
    }

    /// Finalize every stage in order. Returns the number of stages that
    /// reported warnings.
    pub(crate) fn finalize(&mut self, worker: WorkerId) -> usize {
        let mut warned = 0;
        for slot in &mut self.slots {
            slot.finalize(worker);
            if slot.warnings() > 0 {
                warned += 1;
            }
        }
        warned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventRegistry};
    use crate::stage::{Outcome, StageContext};
    use std::any::Any;

    struct Typed {
        input: &'static str,
        output: &'static str,
    }

    impl Stage for Typed {
        fn kind(&self) -> &'static str {
            "Typed"
        }
        fn input_type(&self) -> &'static str {
            self.input
        }
        fn output_type(&self) -> &'static str {
            self.output
        }
        fn process(&mut self, _: &mut dyn Event, _: &mut OutputSlot, _: &mut StageContext<'_>) -> Outcome {
            Outcome::Forward
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn chain(types: &[(&'static str, &'static str)]) -> Chain {
        let mut chain = Chain::new();
        for (i, (input, output)) in types.iter().enumerate() {
            chain.push(
                Box::new(Typed {
                    input: *input,
                    output: *output,
                }),
                StageConfig::new("Typed", format!("s{}", i)),
            );
        }
        chain
    }

    fn registry() -> EventRegistry {
        EventRegistry::with_defaults()
    }

    #[test]
    fn test_matching_types() {
        let c = chain(&[("SampleEvent", "SampleEvent"), ("SampleEvent", "PulseEvent")]);
        assert!(c.validate("SampleEvent", &registry()).is_ok());
        assert_eq!(c.output_type(), "PulseEvent");
    }

    #[test]
    fn test_adjacent_mismatch_is_fatal() {
        let c = chain(&[("SampleEvent", "PulseEvent"), ("SampleEvent", "SampleEvent")]);
        let err = c.validate("SampleEvent", &registry()).unwrap_err();
        assert!(matches!(err, EngineError::ChainMismatch { ref upstream, .. } if upstream == "s0"));
    }

    #[test]
    fn test_wildcard_side_is_compatible() {
        let c = chain(&[("SampleEvent", ANY_EVENT), ("PulseEvent", "PulseEvent")]);
        assert!(c.validate("SampleEvent", &registry()).is_ok());
    }

    #[test]
    fn test_passthrough_stages_skipped() {
        let c = chain(&[
            ("SampleEvent", "PulseEvent"),
            (ANY_EVENT, ANY_EVENT),
            ("PulseEvent", "PulseEvent"),
        ]);
        assert!(c.validate("SampleEvent", &registry()).is_ok());
    }

    #[test]
    fn test_first_stage_mismatch_not_fatal() {
        let c = chain(&[("PulseEvent", "PulseEvent")]);
        assert!(c.validate("SampleEvent", &registry()).is_ok());
    }

    #[test]
    fn test_unknown_event_type() {
        let c = chain(&[("SampleEvent", "HitsEvent")]);
        assert!(matches!(
            c.validate("SampleEvent", &registry()),
            Err(EngineError::UnknownEventType { ref tag, .. }) if tag == "HitsEvent"
        ));
    }

    #[test]
    fn test_from_config() {
        let configs = vec![
            StageConfig::new("SampleAnalysis", "sAna"),
            StageConfig::new("PulseFinder", "pf").with_verbosity(Verbosity::Debug),
        ];
        let c = Chain::from_config(&configs, &StageFactory::with_builtins()).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.verbosity(), Verbosity::Debug);
        assert!(c.find("pf").is_some());
        assert!(!c.single_thread_only());

        let bad = vec![StageConfig::new("Nope", "")];
        assert!(Chain::from_config(&bad, &StageFactory::with_builtins()).is_err());
    }
}
