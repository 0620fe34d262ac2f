//! What a stage can see while it runs.

use crate::config::{StageConfig, Verbosity};
use crate::observable::{CellType, ObservableTable, WorkerId};
use crate::stage::counters::{CounterSnapshot, StageCounters};
use crate::stage::slot::{StageSlot, StageState};
use crate::stage::Stage;
use std::sync::Arc;

/// Read-only view of the other stages in the same chain.
///
/// Every stage except the current one is listed, including the upstream
/// stage whose output event is being consumed. Output events live in the
/// chain beside the slots, so borrowing one leaves its stage visible.
#[derive(Clone, Copy, Default)]
pub struct Friends<'a> {
    before: &'a [StageSlot],
    after: &'a [StageSlot],
}

impl<'a> Friends<'a> {
    pub fn new(before: &'a [StageSlot], after: &'a [StageSlot]) -> Self {
        Self { before, after }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a StageSlot> {
        self.before.iter().chain(self.after.iter())
    }

    /// Look a friend up by instance name, then by stage kind.
    pub fn find(&self, name_or_kind: &str) -> Option<&'a StageSlot> {
        self.iter()
            .find(|slot| slot.name() == name_or_kind)
            .or_else(|| self.iter().find(|slot| slot.kind() == name_or_kind))
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle passed to [`Stage::init`] and [`Stage::process`].
pub struct StageContext<'a> {
    table: &'a mut ObservableTable,
    state: &'a mut StageState,
    config: &'a StageConfig,
    friends: Friends<'a>,
    worker: WorkerId,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        table: &'a mut ObservableTable,
        state: &'a mut StageState,
        config: &'a StageConfig,
        friends: Friends<'a>,
        worker: WorkerId,
    ) -> Self {
        Self {
            table,
            state,
            config,
            friends,
            worker,
        }
    }

    pub fn stage_name(&self) -> &str {
        &self.state.name
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn verbosity(&self) -> Verbosity {
        self.state.verbosity
    }

    pub fn config(&self) -> &StageConfig {
        self.config
    }

    /// The worker's table, for reading observables of other stages and the
    /// input-side observables.
    pub fn table(&self) -> &ObservableTable {
        self.table
    }

    /// Write local observable `local` (stored as `<stage>_<local>`).
    ///
    /// Configured observables are written and marked as set for this event.
    /// Unknown names are created on the fly when dynamic observables are
    /// enabled and the table is still open; otherwise the write is ignored.
    pub fn set_observable<T: CellType>(&mut self, local: &str, value: T) {
        if let Some(&id) = self.state.defined.get(local) {
            if self.table.set_value(id, value).is_ok() {
                self.state.updated.insert(id);
            }
            return;
        }

        if !self.state.dynamic_enabled {
            return;
        }

        if let Some(&id) = self.state.dynamic.get(local) {
            let _ = self.table.set_value(id, value);
            return;
        }

        let full = self.state.qualified(local);
        match self.table.set_value_by_name(&full, value) {
            Ok(id) => {
                tracing::debug!("{}: created observable '{}'", self.state.name, full);
                self.state.dynamic.insert(local.to_string(), id);
            }
            Err(e) => tracing::trace!("{}: dropped write to '{}': {}", self.state.name, full, e),
        }
    }

    /// Read back one of this stage's observables.
    pub fn observable<T: CellType>(&self, local: &str) -> Option<T> {
        let id = self
            .state
            .defined
            .get(local)
            .or_else(|| self.state.dynamic.get(local))?;
        self.table.value(*id).ok()
    }

    /// Whether `local` is a configured observable of this stage.
    pub fn is_defined(&self, local: &str) -> bool {
        self.state.defined.contains_key(local)
    }

    pub fn friends(&self) -> Friends<'a> {
        self.friends
    }

    /// Another stage of this chain, by instance name or kind.
    pub fn friend(&self, name_or_kind: &str) -> Option<&'a StageSlot> {
        self.friends.find(name_or_kind)
    }

    /// A friend downcast to its concrete stage type.
    pub fn friend_as<T: Stage + 'static>(&self, name_or_kind: &str) -> Option<&'a T> {
        self.friend(name_or_kind)
            .and_then(|slot| slot.stage().as_any().downcast_ref::<T>())
    }

    /// Float parameter from a friend's configuration.
    pub fn friend_parameter_f64(&self, name_or_kind: &str, key: &str) -> Option<f64> {
        let slot = self.friend(name_or_kind)?;
        slot.config().parameter(key)?;
        Some(slot.config().parameter_f64(key, 0.0))
    }

    /// Counters of this stage in sibling worker `index`.
    pub fn parallel(&self, index: usize) -> Option<&Arc<StageCounters>> {
        self.state.parallels.get(index)
    }

    /// Report a stage-level problem; counted in the worker's warning tally.
    pub fn warn(&mut self, message: std::fmt::Arguments<'_>) {
        self.state.warn(message);
    }
}

/// Handle passed to [`Stage::finalize`].
pub struct FinalizeContext<'a> {
    name: &'a str,
    worker: WorkerId,
    counters: &'a StageCounters,
    parallels: &'a [Arc<StageCounters>],
}

impl<'a> FinalizeContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        worker: WorkerId,
        counters: &'a StageCounters,
        parallels: &'a [Arc<StageCounters>],
    ) -> Self {
        Self {
            name,
            worker,
            counters,
            parallels,
        }
    }

    pub fn stage_name(&self) -> &str {
        self.name
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// This worker's counters.
    pub fn own(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn parallel_count(&self) -> usize {
        self.parallels.len()
    }

    /// Counters summed over this worker and every parallel.
    pub fn aggregate(&self) -> CounterSnapshot {
        self.own()
            + self
                .parallels
                .iter()
                .map(|counters| counters.snapshot())
                .sum::<CounterSnapshot>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::TypeRegistry;
    use crate::stage::builtin::{PassThrough, SampleAnalysis};

    fn slots() -> Vec<StageSlot> {
        vec![
            StageSlot::new(
                Box::new(SampleAnalysis::new(20)),
                StageConfig::new("SampleAnalysis", "sAna").with_parameter("baseline_samples", 20),
            ),
            StageSlot::new(Box::new(PassThrough::new()), StageConfig::new("PassThrough", "pt")),
        ]
    }

    #[test]
    fn test_friend_lookup() {
        let slots = slots();
        let friends = Friends::new(&slots[..1], &slots[1..]);
        assert_eq!(friends.len(), 2);
        assert_eq!(friends.find("sAna").unwrap().name(), "sAna");
        assert_eq!(friends.find("PassThrough").unwrap().name(), "pt");
        assert!(friends.find("PulseFinder").is_none());
    }

    #[test]
    fn test_set_observable_configured_and_dynamic() {
        let mut table = ObservableTable::new("t", Arc::new(TypeRegistry::with_defaults()));
        let mut configured = StageSlot::new(
            Box::new(PassThrough::new()),
            StageConfig::new("PassThrough", "a").with_observable("x", "double", ""),
        );
        configured.register_observables(&mut table);

        let StageSlot { state, config, .. } = &mut configured;
        let mut ctx = StageContext::new(&mut table, state, config, Friends::default(), WorkerId(0));
        ctx.set_observable("x", 2.0f64);
        ctx.set_observable("y", 1.0f64);
        assert_eq!(ctx.observable::<f64>("x"), Some(2.0));
        assert!(!ctx.table().contains("a_y"));

        let mut dynamic = StageSlot::new(
            Box::new(PassThrough::new()),
            StageConfig::new("PassThrough", "b").with_dynamic_observables(),
        );
        let StageSlot { state, config, .. } = &mut dynamic;
        let mut ctx = StageContext::new(&mut table, state, config, Friends::default(), WorkerId(0));
        ctx.set_observable("y", 3i32);
        assert_eq!(ctx.table().value_by_name::<i32>("b_y").unwrap(), 3);
        assert_eq!(ctx.observable::<i32>("y"), Some(3));
    }

    #[test]
    fn test_aggregate() {
        let own = StageCounters::new();
        own.record_in();
        let other = Arc::new(StageCounters::new());
        other.record_in();
        other.record_in();
        let parallels = vec![other];
        let ctx = FinalizeContext::new("s", WorkerId(0), &own, &parallels);
        assert_eq!(ctx.own().events_in, 1);
        assert_eq!(ctx.aggregate().events_in, 3);
        assert_eq!(ctx.parallel_count(), 1);
    }
}
