//! A stage plus the bookkeeping every stage shares.
//!
//! [`StageSlot`] owns the boxed [`Stage`] and its [`StageState`]: the
//! observables the stage registered, the set written during the current
//! event, the cut ranges, the validation flag, and the counters shared with
//! sibling workers. The per-event wrapper (`begin_event`, `apply_cut`,
//! `end_event`) lives here so concrete stages only implement `process`.

use crate::config::{CutRange, StageConfig, Verbosity};
use crate::error::Result;
use crate::event::Event;
use crate::observable::{ObservableId, ObservableTable, WorkerId};
use crate::stage::context::{FinalizeContext, Friends, StageContext};
use crate::stage::counters::StageCounters;
use crate::stage::output::OutputSlot;
use crate::stage::{Outcome, Stage};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// Where a stage left the event for the next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The (possibly modified) input event continues.
    Forwarded,
    /// The stage's own output event continues.
    Emitted,
}

/// Mutable per-stage bookkeeping.
#[derive(Debug)]
pub struct StageState {
    pub(crate) name: String,
    pub(crate) verbosity: Verbosity,
    /// Local name -> table index, for configured observables.
    pub(crate) defined: BTreeMap<String, ObservableId>,
    /// Local name -> table index, for observables created on first write.
    pub(crate) dynamic: HashMap<String, ObservableId>,
    pub(crate) updated: HashSet<ObservableId>,
    pub(crate) cuts: Vec<CutRange>,
    pub(crate) dynamic_enabled: bool,
    pub(crate) validate_configured: bool,
    pub(crate) validating: bool,
    pub(crate) initialized: bool,
    pub(crate) counters: Arc<StageCounters>,
    pub(crate) parallels: Vec<Arc<StageCounters>>,
    pub(crate) warnings: u32,
}

impl StageState {
    fn new(config: &StageConfig) -> Self {
        Self {
            name: config.display_name().to_string(),
            verbosity: config.verbosity,
            defined: BTreeMap::new(),
            dynamic: HashMap::new(),
            updated: HashSet::new(),
            cuts: Vec::new(),
            dynamic_enabled: config.dynamic_observables(),
            validate_configured: config.validate_observables,
            validating: config.validate_observables,
            initialized: false,
            counters: Arc::new(StageCounters::new()),
            parallels: Vec::new(),
            warnings: 0,
        }
    }

    /// Full table name of a local observable.
    pub(crate) fn qualified(&self, local: &str) -> String {
        format!("{}_{}", self.name, local)
    }

    /// Point each cut at a table observable. A name the table does not know
    /// is tried with this stage's prefix; if that is unknown too the name is
    /// kept and the cut never fires.
    pub(crate) fn resolve_cuts(&mut self, table: &ObservableTable) {
        for i in 0..self.cuts.len() {
            let name = &self.cuts[i].observable;
            if table.contains(name) {
                continue;
            }
            let qualified = self.qualified(name);
            if table.contains(&qualified) {
                self.cuts[i].observable = qualified;
            } else {
                tracing::debug!("{}: cut on unknown observable '{}'", self.name, name);
            }
        }
    }

    pub(crate) fn warn(&mut self, message: std::fmt::Arguments<'_>) {
        self.warnings += 1;
        tracing::warn!("{}: {}", self.name, message);
    }
}

/// One position in a chain.
pub struct StageSlot {
    pub(crate) stage: Box<dyn Stage>,
    pub(crate) state: StageState,
    pub(crate) config: StageConfig,
}

impl StageSlot {
    pub fn new(stage: Box<dyn Stage>, config: StageConfig) -> Self {
        let state = StageState::new(&config);
        Self {
            stage,
            state,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn kind(&self) -> &'static str {
        self.stage.kind()
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    pub fn stage_mut(&mut self) -> &mut dyn Stage {
        self.stage.as_mut()
    }

    pub fn input_type(&self) -> &'static str {
        self.stage.input_type()
    }

    pub fn output_type(&self) -> &'static str {
        self.stage.output_type()
    }

    pub fn verbosity(&self) -> Verbosity {
        self.state.verbosity
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn counters(&self) -> &Arc<StageCounters> {
        &self.state.counters
    }

    /// Counters of the same stage in sibling worker `index`.
    pub fn parallel(&self, index: usize) -> Option<&Arc<StageCounters>> {
        self.state.parallels.get(index)
    }

    pub fn parallels(&self) -> &[Arc<StageCounters>] {
        &self.state.parallels
    }

    pub(crate) fn set_parallels(&mut self, parallels: Vec<Arc<StageCounters>>) {
        self.state.parallels = parallels;
    }

    pub fn cuts(&self) -> &[CutRange] {
        &self.state.cuts
    }

    /// Configured observables as (local name, table index).
    pub fn defined_observables(&self) -> impl Iterator<Item = (&str, ObservableId)> {
        self.state
            .defined
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
    }

    pub fn warnings(&self) -> u32 {
        self.state.warnings
    }

    pub fn validation_enabled(&self) -> bool {
        self.state.validating
    }

    /// Turn completeness validation on, or back to its configured setting.
    pub fn set_validation(&mut self, force: bool) {
        self.state.validating = force || self.state.validate_configured;
    }

    // ── Setup ──

    /// Register every enabled configured observable and load the cuts.
    ///
    /// Observables whose type cannot be resolved are reported and skipped.
    /// Returns the number registered.
    pub fn register_observables(&mut self, table: &mut ObservableTable) -> usize {
        let specs: Vec<_> = self.config.enabled_observables().cloned().collect();
        for spec in specs {
            let full = self.state.qualified(&spec.name);
            let id = table.add_observable(&full, &spec.type_name, &spec.description);
            if id.is_valid() {
                self.state.defined.insert(spec.name, id);
            } else {
                self.state.warn(format_args!(
                    "observable '{}' ({}) could not be registered",
                    full, spec.type_name
                ));
            }
        }
        self.state.cuts = self.config.collect_cuts();
        self.state.defined.len()
    }

    pub(crate) fn init(
        &mut self,
        table: &mut ObservableTable,
        friends: Friends<'_>,
        worker: WorkerId,
    ) -> Result<()> {
        let StageSlot {
            stage,
            state,
            config,
        } = self;
        state.resolve_cuts(table);
        let mut ctx = StageContext::new(table, state, config, friends, worker);
        stage.init(&mut ctx)?;
        state.initialized = true;
        Ok(())
    }

    // ── Per event ──

    /// Reset the output event and the written set for a new event.
    pub fn begin_event(&mut self, input: &dyn Event, output: &mut OutputSlot) {
        if let Some(event) = output.get_mut() {
            event.initialize();
            event.copy_header_from(input);
        }
        self.state.updated.clear();
    }

    /// Whether any cut rejects the current table values.
    ///
    /// Cuts on observables that are missing or not numeric never fire.
    pub fn apply_cut(&self, table: &ObservableTable) -> bool {
        self.state.cuts.iter().any(|cut| {
            table
                .numeric_value(&cut.observable)
                .is_some_and(|value| cut.rejects(value))
        })
    }

    /// Report configured observables the stage did not write this event.
    pub fn end_event(&mut self) {
        if !self.state.validating {
            return;
        }
        let missing: Vec<String> = self
            .state
            .defined
            .iter()
            .filter(|(_, id)| !self.state.updated.contains(id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in missing {
            self.state
                .warn(format_args!("observable '{}' was not set for this event", name));
        }
    }

    /// Run one event through this stage: begin, process, cut, end.
    ///
    /// With `calibrating` set, a discarded result falls back to the stage's
    /// own output event, and a stage that returns something other than its
    /// own output event is reported. When nothing is left to fall back to,
    /// `end_event` is skipped.
    pub(crate) fn drive(
        &mut self,
        input: &mut dyn Event,
        output: &mut OutputSlot,
        table: &mut ObservableTable,
        friends: Friends<'_>,
        worker: WorkerId,
        calibrating: bool,
    ) -> Option<Handoff> {
        if !self.state.initialized {
            tracing::error!("{}: process called before init", self.state.name);
            return None;
        }

        let start = Instant::now();
        self.state.counters.record_in();

        let was_bound = output.is_bound();
        self.begin_event(input, output);

        let outcome = {
            let StageSlot {
                stage,
                state,
                config,
            } = self;
            let mut ctx = StageContext::new(table, state, config, friends, worker);
            stage.process(input, output, &mut ctx)
        };

        let mut result = match outcome {
            Outcome::Forward => Some(Handoff::Forwarded),
            Outcome::Emit if output.is_bound() => {
                if !was_bound {
                    if let Some(event) = output.get_mut() {
                        event.copy_header_from(input);
                    }
                }
                Some(Handoff::Emitted)
            }
            Outcome::Emit => {
                self.state
                    .warn(format_args!("emitted an event without binding its output slot"));
                None
            }
            Outcome::Discard => None,
        };

        if self.apply_cut(table) {
            self.state.counters.record_cut();
            result = None;
        } else if result.is_none() {
            self.state.counters.record_null();
        }

        if calibrating {
            if result.is_none() && output.is_bound() {
                tracing::debug!("{}: null result, using own output event", self.state.name);
                result = Some(Handoff::Emitted);
            }
            if result.is_none() {
                self.state.counters.record_busy(start.elapsed());
                return None;
            }
            if result == Some(Handoff::Forwarded) && output.is_bound() {
                self.state.warn(format_args!(
                    "output event differs from the event returned by process"
                ));
            }
            let declared = self.stage.output_type();
            if let Some(tag) = output.type_tag() {
                if result == Some(Handoff::Emitted) && !crate::event::tags_compatible(tag, declared) {
                    self.state.warn(format_args!(
                        "declares output {} but produced {}",
                        declared, tag
                    ));
                }
            }
        }

        self.end_event();

        if result.is_some() {
            self.state.counters.record_out();
        }
        self.state.counters.record_busy(start.elapsed());
        result
    }

    // ── Teardown ──

    pub(crate) fn finalize(&mut self, worker: WorkerId) {
        let ctx = FinalizeContext::new(
            &self.state.name,
            worker,
            &self.state.counters,
            &self.state.parallels,
        );
        self.stage.finalize(&ctx);
    }

    /// Log the stage banner: identity, observables, cuts.
    pub fn describe(&self, table: &ObservableTable) {
        tracing::info!(
            "=== {} ({}) : {} -> {} ===",
            self.state.name,
            self.kind(),
            self.input_type(),
            self.output_type()
        );
        if self.state.dynamic_enabled {
            tracing::info!("  dynamic observables enabled");
        }
        for (local, id) in &self.state.defined {
            if let Some(info) = table.info(*id) {
                tracing::info!("  observable {} -> {} ({}) {}", local, info.name, info.ty, info.description);
            }
        }
        for cut in &self.state.cuts {
            tracing::info!("  cut {} in [{}, {}]", cut.observable, cut.min, cut.max);
        }
    }
}

impl std::fmt::Debug for StageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSlot")
            .field("name", &self.state.name)
            .field("kind", &self.kind())
            .field("observables", &self.state.defined.len())
            .field("cuts", &self.state.cuts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SampleEvent;
    use crate::observable::TypeRegistry;
    use crate::stage::builtin::PassThrough;

    fn table() -> ObservableTable {
        ObservableTable::new("t", Arc::new(TypeRegistry::with_defaults()))
    }

    fn slot(config: StageConfig) -> StageSlot {
        StageSlot::new(Box::new(PassThrough::new()), config)
    }

    #[test]
    fn test_register_prefixes_names() {
        let mut t = table();
        let mut s = slot(
            StageConfig::new("PassThrough", "pt")
                .with_observable("a", "double", "")
                .with_observable("h", "TH1D", ""),
        );
        assert_eq!(s.register_observables(&mut t), 1);
        assert!(t.contains("pt_a"));
        assert_eq!(s.warnings(), 1);
    }

    #[test]
    fn test_apply_cut() {
        let mut t = table();
        let mut s = slot(
            StageConfig::new("PassThrough", "pt")
                .with_observable("x", "int", "")
                .with_cut("x", 0.0, 1.0),
        );
        s.register_observables(&mut t);
        s.state.resolve_cuts(&t);
        assert_eq!(s.cuts()[0].observable, "pt_x");

        t.set_value_by_name("pt_x", 1i32).unwrap();
        assert!(!s.apply_cut(&t));
        t.set_value_by_name("pt_x", 2i32).unwrap();
        assert!(s.apply_cut(&t));
    }

    #[test]
    fn test_cut_names_resolved_against_table() {
        let mut t = table();
        t.add_observable("up_energy", "double", "");
        t.add_observable("pt_energy", "double", "");
        let mut s = slot(
            StageConfig::new("PassThrough", "pt")
                .with_cut("up_energy", 0.0, 1.0)
                .with_cut("energy", 0.0, 1.0)
                .with_cut("pt_energy", 0.0, 2.0)
                .with_cut("nothing", 0.0, 1.0),
        );
        s.register_observables(&mut t);
        s.state.resolve_cuts(&t);
        let names: Vec<_> = s.cuts().iter().map(|c| c.observable.as_str()).collect();
        assert_eq!(names, vec!["up_energy", "pt_energy", "pt_energy", "nothing"]);

        // Resolving again changes nothing
        s.state.resolve_cuts(&t);
        assert_eq!(s.cuts()[1].observable, "pt_energy");
    }

    #[test]
    fn test_no_cuts_never_discard() {
        let mut t = table();
        let mut s = slot(StageConfig::new("PassThrough", "pt").with_observable("x", "double", ""));
        s.register_observables(&mut t);
        t.set_value_by_name("pt_x", 1e9f64).unwrap();
        assert!(!s.apply_cut(&t));
    }

    #[test]
    fn test_completeness_warning() {
        let mut t = table();
        let mut s = slot(StageConfig::new("PassThrough", "pt").with_observable("x", "double", ""));
        s.register_observables(&mut t);

        s.end_event();
        assert_eq!(s.warnings(), 0);

        s.set_validation(true);
        s.end_event();
        assert_eq!(s.warnings(), 1);

        s.set_validation(false);
        assert!(!s.validation_enabled());
    }

    #[test]
    fn test_begin_event_resets_distinct_output() {
        let mut s = slot(StageConfig::new("PassThrough", "pt"));
        let input = SampleEvent::from_samples(vec![1.0]).with_id(7);
        let mut output = OutputSlot::new();
        output.get_or_insert::<SampleEvent>().samples.push(3.0);

        s.begin_event(&input, &mut output);
        let out = output.downcast_ref::<SampleEvent>().unwrap();
        assert!(out.samples.is_empty());
        assert_eq!(out.header.id, 7);
    }
}
