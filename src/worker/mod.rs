//! Worker: one chain, one table, one thread.
//!
//! A worker validates its chain, resolves where its output event lives
//! with a calibration run, then loops: fetch an input event, drive it
//! through the chain, submit the result. It never talks to other workers;
//! everything shared goes through the [`RunnerLink`].
//!
//! # States
//!
//! `Idle → ChainValidated → Calibrated → Running → Finished`, plus
//! `Aborted`, which any setup step can enter on a configuration error and
//! which is terminal.

pub mod chain;
pub mod link;

pub use chain::Chain;
pub use link::RunnerLink;

use crate::config::Verbosity;
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::event::{Event, EventRegistry, ANY_EVENT};
use crate::observable::{ObservableTable, WorkerId};
use crate::stage::{CounterSnapshot, Friends, Handoff};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Calibration gives up after this many discarded events.
pub const MAX_CALIBRATION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    ChainValidated,
    Calibrated,
    Running,
    Finished,
    Aborted,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::ChainValidated => "chain validated",
            WorkerState::Calibrated => "calibrated",
            WorkerState::Running => "running",
            WorkerState::Finished => "finished",
            WorkerState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Where an event leaving the chain lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSlot {
    /// The worker's input buffer (every stage worked in place).
    Input,
    /// The output slot of the stage at this chain position.
    Stage(usize),
    /// The worker's own output event, used without a calibration run.
    Assembled,
}

/// Per-stage line of a [`WorkerReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub kind: &'static str,
    pub warnings: u32,
    pub counters: CounterSnapshot,
}

/// Summary returned by [`Worker::finalize`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub worker: u32,
    pub state: WorkerState,
    pub processed: u64,
    pub accepted: u64,
    pub discarded: u64,
    pub stages_with_warnings: usize,
    pub stages: Vec<StageReport>,
}

pub struct Worker {
    id: WorkerId,
    state: WorkerState,
    chain: Chain,
    table: ObservableTable,
    events: Arc<EventRegistry>,
    input: Option<Box<dyn Event>>,
    assembled: Option<Box<dyn Event>>,
    resolved: Option<EventSlot>,
    calibration_run: bool,
    stages_ready: bool,
    verbosity: Verbosity,
    finished: Arc<AtomicBool>,
    processed: u64,
    accepted: u64,
    slot_change_reported: bool,
    finalized: bool,
}

impl Worker {
    /// Create a worker around a freshly built chain.
    ///
    /// The worker runs at the highest verbosity of its stages; workers other
    /// than the primary one are capped at [`Verbosity::Essential`].
    pub fn new(id: WorkerId, chain: Chain, context: &EngineContext) -> Self {
        let mut verbosity = chain.verbosity().max(context.verbosity);
        if !id.is_primary() {
            verbosity = verbosity.min(Verbosity::Essential);
        }
        Self {
            id,
            state: WorkerState::Idle,
            chain,
            table: ObservableTable::new(format!("worker-{}", id.0), context.types.clone()),
            events: context.events.clone(),
            input: None,
            assembled: None,
            resolved: None,
            calibration_run: true,
            stages_ready: false,
            verbosity,
            finished: Arc::new(AtomicBool::new(false)),
            processed: 0,
            accepted: 0,
            slot_change_reported: false,
            finalized: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    pub fn table(&self) -> &ObservableTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ObservableTable {
        &mut self.table
    }

    /// Flag raised when the loop ends or the worker aborts.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Output location fixed by the calibration run.
    pub fn resolved_output(&self) -> Option<EventSlot> {
        self.resolved
    }

    pub fn input_event(&self) -> Option<&dyn Event> {
        self.input.as_deref()
    }

    /// Replace the input buffer, e.g. to drive [`run_one_event`](Self::run_one_event) directly.
    pub fn load_input(&mut self, event: Box<dyn Event>) {
        self.input = Some(event);
    }

    /// The event stored at `slot`, if any.
    pub fn output_event(&self, slot: EventSlot) -> Option<&dyn Event> {
        locate(&self.input, &self.chain, &self.assembled, slot)
    }

    fn abort(&mut self, error: EngineError) -> EngineError {
        tracing::error!("Worker {} aborted: {}", self.id, error);
        self.state = WorkerState::Aborted;
        self.finished.store(true, Ordering::Release);
        EngineError::Aborted {
            worker: self.id.0,
            reason: error.to_string(),
        }
    }

    fn expect_state(&self, expected: WorkerState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState(format!(
                "worker {}: {} requires state '{}', found '{}'",
                self.id, operation, expected, self.state
            )))
        }
    }

    // ── Setup ──

    /// Check the chain's declared event types against each other and
    /// against the input type. A failure aborts the worker.
    pub fn validate_chain(&mut self, sample_input_type: &str) -> Result<()> {
        self.expect_state(WorkerState::Idle, "validate_chain")?;
        match self.chain.validate(sample_input_type, &self.events) {
            Ok(()) => {
                tracing::debug!("Worker {}: chain of {} stages validated", self.id, self.chain.len());
                self.state = WorkerState::ChainValidated;
                Ok(())
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Everything between an idle worker and the first event: validate,
    /// register observables, initialize stages, resolve the output event,
    /// and lock the table.
    pub fn prepare(&mut self, link: &dyn RunnerLink) -> Result<()> {
        self.expect_state(WorkerState::Idle, "prepare")?;

        let Some(sample) = link.sample_input_event() else {
            return Err(self.abort(EngineError::NoInput));
        };
        let sample_type = sample.type_tag();
        self.input = Some(sample);
        self.validate_chain(sample_type)?;

        self.calibration_run = link.uses_calibration_run();
        if self.calibration_run {
            self.calibrate(link)?;
        } else {
            self.assemble_output(link)?;
        }

        self.table.lock();
        self.chain.reset_counters();
        tracing::info!(
            "Worker {} ready: {} stages, {} observables",
            self.id,
            self.chain.len(),
            self.table.len()
        );
        Ok(())
    }

    /// Register observables and initialize the stages, once.
    fn ensure_stages_ready(&mut self, link: &dyn RunnerLink) -> Result<()> {
        if self.stages_ready {
            return Ok(());
        }
        for name in link.input_observables() {
            self.table.add_observable(&name, "double", "input observable");
        }
        let registered = self.chain.register_observables(&mut self.table);
        tracing::debug!("Worker {}: {} stage observables registered", self.id, registered);

        if let Err(e) = self.chain.init(&mut self.table, self.id) {
            return Err(self.abort(e));
        }
        if self.verbosity.at_least(Verbosity::Info) {
            for slot in self.chain.slots() {
                slot.describe(&self.table);
            }
        }
        self.stages_ready = true;
        Ok(())
    }

    /// Dry-run fresh input events through the chain until one comes out
    /// the other end, and remember where it lives.
    ///
    /// Completeness validation is on for every stage during the attempts.
    /// After [`MAX_CALIBRATION_ATTEMPTS`] discarded events the worker aborts.
    /// On success every stage is initialized a second time, so state a stage
    /// built up during the dry run does not reach the real run.
    pub fn calibrate(&mut self, link: &dyn RunnerLink) -> Result<()> {
        self.expect_state(WorkerState::ChainValidated, "calibrate")?;
        self.ensure_stages_ready(link)?;

        self.chain.set_validation(true);
        let mut resolved = None;
        let mut attempts = 0;
        for attempt in 0..MAX_CALIBRATION_ATTEMPTS {
            let Some(input) = self.input.as_mut() else {
                break;
            };
            if !link.fetch_calibration_input(attempt, input, &mut self.table) {
                tracing::debug!("Worker {}: input ended during calibration", self.id);
                break;
            }
            attempts += 1;
            self.table.set_event_info(input.as_ref());
            tracing::debug!(
                "Worker {}: calibration attempt {} with {} {}",
                self.id,
                attempt,
                input.type_tag(),
                input.id()
            );

            match self.run_chain(true) {
                Some(slot) => {
                    resolved = Some(slot);
                    break;
                }
                None => tracing::debug!("Worker {}: null output, trying again", self.id),
            }
        }
        self.chain.set_validation(false);

        match resolved {
            Some(slot) => {
                if let Some(event) = self.output_event(slot) {
                    tracing::debug!("Worker {}: output event is {} at {:?}", self.id, event.type_tag(), slot);
                }
                // Calibration events are processed again by the run loop
                if let Err(e) = self.chain.init(&mut self.table, self.id) {
                    return Err(self.abort(e));
                }
                self.resolved = Some(slot);
                self.state = WorkerState::Calibrated;
                Ok(())
            }
            None if attempts == 0 => Err(self.abort(EngineError::NoInput)),
            None => Err(self.abort(EngineError::CalibrationFailed { attempts })),
        }
    }

    /// Without a calibration run, build the output event from the last
    /// stage's declared type (the input type for a wildcard chain).
    fn assemble_output(&mut self, link: &dyn RunnerLink) -> Result<()> {
        self.expect_state(WorkerState::ChainValidated, "assemble_output")?;
        self.ensure_stages_ready(link)?;

        let declared = self.chain.output_type();
        let tag = if declared == ANY_EVENT {
            self.input.as_deref().map_or(ANY_EVENT, |event| event.type_tag())
        } else {
            declared
        };
        match self.events.create(tag) {
            Some(event) => {
                tracing::debug!("Worker {}: assembled output event {}", self.id, tag);
                self.assembled = Some(event);
                self.resolved = Some(EventSlot::Assembled);
                self.state = WorkerState::Calibrated;
                Ok(())
            }
            None => Err(self.abort(EngineError::UnknownEventType {
                stage: self
                    .chain
                    .slots()
                    .last()
                    .map_or_else(|| "<input>".to_string(), |slot| slot.name().to_string()),
                tag: tag.to_string(),
            })),
        }
    }

    // ── Per event ──

    /// Drive the current input through every stage. Stops at the first
    /// discard.
    fn run_chain(&mut self, calibrating: bool) -> Option<EventSlot> {
        let input = self.input.as_deref_mut()?;
        let timed = self.verbosity.at_least(Verbosity::Debug);
        let (slots, outputs) = self.chain.parts_mut();

        let mut current = EventSlot::Input;
        for k in 0..slots.len() {
            let (slots_before, slots_rest) = slots.split_at_mut(k);
            let (slot, slots_after) = slots_rest.split_first_mut()?;
            let (outputs_before, outputs_rest) = outputs.split_at_mut(k);
            let (output, _) = outputs_rest.split_first_mut()?;

            let event: &mut dyn Event = match current {
                EventSlot::Stage(j) => outputs_before.get_mut(j)?.get_mut()?,
                EventSlot::Input | EventSlot::Assembled => &mut *input,
            };

            let start = timed.then(Instant::now);
            if timed {
                tracing::debug!("------- Starting stage {} -------", slot.name());
            }

            let handoff = slot.drive(
                event,
                output,
                &mut self.table,
                Friends::new(slots_before, slots_after),
                self.id,
                calibrating,
            );

            if let Some(start) = start {
                tracing::debug!(
                    "------- End of stage {}{} ({:.3} ms) -------",
                    slot.name(),
                    if handoff.is_none() { " (null returned)" } else { "" },
                    start.elapsed().as_secs_f64() * 1e3
                );
            }

            match handoff? {
                Handoff::Forwarded => {}
                Handoff::Emitted => current = EventSlot::Stage(k),
            }
        }
        Some(current)
    }

    /// Run the current input event through the chain.
    ///
    /// Returns where the resulting event lives, or `None` if a stage
    /// discarded it. Without a calibration run the result is copied into
    /// the assembled output event.
    pub fn run_one_event(&mut self) -> Option<EventSlot> {
        if let Some(input) = self.input.as_deref() {
            self.table.set_event_info(input);
        }
        self.processed += 1;

        let Some(slot) = self.run_chain(false) else {
            return None;
        };
        self.accepted += 1;

        let result = if self.calibration_run {
            if self.resolved.is_some_and(|resolved| resolved != slot) && !self.slot_change_reported {
                tracing::warn!(
                    "Worker {}: output event moved from {:?} to {:?} after calibration",
                    self.id,
                    self.resolved,
                    slot
                );
                self.slot_change_reported = true;
            }
            slot
        } else {
            let copy = self.output_event(slot).map(|event| event.clone_event());
            if let (Some(copy), Some(assembled)) = (&copy, &self.assembled) {
                if copy.type_tag() != assembled.type_tag() && !self.slot_change_reported {
                    tracing::warn!(
                        "Worker {}: chain produced {} but the output event is {}",
                        self.id,
                        copy.type_tag(),
                        assembled.type_tag()
                    );
                    self.slot_change_reported = true;
                }
            }
            if copy.is_some() {
                self.assembled = copy;
            }
            EventSlot::Assembled
        };

        if let Some(event) = locate(&self.input, &self.chain, &self.assembled, result) {
            self.table.set_event_info(event);
        }
        Some(result)
    }

    /// Process input until the link reports the end. Returns the number of
    /// events processed.
    pub fn run_loop(&mut self, link: &dyn RunnerLink) -> Result<u64> {
        self.expect_state(WorkerState::Calibrated, "run_loop")?;
        self.state = WorkerState::Running;
        tracing::debug!("Worker {} running", self.id);

        loop {
            let Some(input) = self.input.as_mut() else {
                break;
            };
            if !link.fetch_next_input(input, &mut self.table) {
                break;
            }
            let result = self.run_one_event();
            if self.verbosity.at_least(Verbosity::Extreme) {
                self.table.log_observables();
            }
            let output = result.and_then(|slot| locate(&self.input, &self.chain, &self.assembled, slot));
            link.submit_result(self.id, output, &self.table);
        }

        self.state = WorkerState::Finished;
        self.finished.store(true, Ordering::Release);
        tracing::info!(
            "Worker {} finished: {} events, {} accepted",
            self.id,
            self.processed,
            self.accepted
        );
        Ok(self.processed)
    }

    /// Finalize every stage once, in chain order, and release the output
    /// events and the observable table.
    pub fn finalize(&mut self) -> Result<WorkerReport> {
        if self.finalized {
            return Err(EngineError::InvalidState(format!(
                "worker {} already finalized",
                self.id
            )));
        }
        self.finalized = true;

        let warned = self.chain.finalize(self.id);
        if warned > 0 {
            tracing::warn!("Worker {}: {} stage(s) reported warnings", self.id, warned);
        }

        let stages = self
            .chain
            .slots()
            .iter()
            .map(|slot| StageReport {
                name: slot.name().to_string(),
                kind: slot.kind(),
                warnings: slot.warnings(),
                counters: slot.counters().snapshot(),
            })
            .collect();

        self.assembled = None;
        self.chain.clear_outputs();
        self.table.clear();

        Ok(WorkerReport {
            worker: self.id.0,
            state: self.state,
            processed: self.processed,
            accepted: self.accepted,
            discarded: self.processed - self.accepted,
            stages_with_warnings: warned,
            stages,
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stages", &self.chain.len())
            .field("processed", &self.processed)
            .finish()
    }
}

fn locate<'a>(
    input: &'a Option<Box<dyn Event>>,
    chain: &'a Chain,
    assembled: &'a Option<Box<dyn Event>>,
    slot: EventSlot,
) -> Option<&'a dyn Event> {
    match slot {
        EventSlot::Input => input.as_deref(),
        EventSlot::Stage(k) => chain.output(k)?.get(),
        EventSlot::Assembled => assembled.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::event::SampleEvent;
    use crate::stage::StageFactory;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct QueueLink {
        queue: Mutex<VecDeque<SampleEvent>>,
        submitted: Mutex<Vec<Option<i32>>>,
        calibration: bool,
    }

    impl QueueLink {
        fn new(events: Vec<SampleEvent>, calibration: bool) -> Self {
            Self {
                queue: Mutex::new(events.into()),
                submitted: Mutex::new(Vec::new()),
                calibration,
            }
        }
    }

    impl RunnerLink for QueueLink {
        fn sample_input_event(&self) -> Option<Box<dyn Event>> {
            Some(Box::new(SampleEvent::default()))
        }

        fn uses_calibration_run(&self) -> bool {
            self.calibration
        }

        fn fetch_next_input(&self, input: &mut Box<dyn Event>, _table: &mut ObservableTable) -> bool {
            match self.queue.lock().unwrap().pop_front() {
                Some(event) => {
                    *input = Box::new(event);
                    true
                }
                None => false,
            }
        }

        fn submit_result(&self, _worker: WorkerId, output: Option<&dyn Event>, _table: &ObservableTable) {
            self.submitted.lock().unwrap().push(output.map(|e| e.id()));
        }
    }

    fn trace(id: i32) -> SampleEvent {
        let mut samples = vec![10.0; 64];
        samples[40] = 80.0;
        SampleEvent::from_samples(samples).with_id(id)
    }

    fn worker(configs: &[StageConfig]) -> Worker {
        let context = EngineContext::default();
        let chain = Chain::from_config(configs, &StageFactory::with_builtins()).unwrap();
        Worker::new(WorkerId(0), chain, &context)
    }

    fn analysis_chain() -> Vec<StageConfig> {
        vec![
            StageConfig::new("SampleAnalysis", "sAna")
                .with_observable("sum", "double", "")
                .with_observable("n_samples", "int", ""),
            StageConfig::new("PulseFinder", "pf")
                .with_observable("n_pulses", "int", "")
                .with_observable("amplitudes", "vector<double>", ""),
        ]
    }

    #[test]
    fn test_prepare_resolves_stage_output() {
        let link = QueueLink::new((0..4).map(trace).collect(), true);
        let mut w = worker(&analysis_chain());
        w.prepare(&link).unwrap();

        assert_eq!(w.state(), WorkerState::Calibrated);
        assert_eq!(w.resolved_output(), Some(EventSlot::Stage(1)));
        assert!(w.table().is_locked());
        assert_eq!(w.table().len(), 4);

        let processed = w.run_loop(&link).unwrap();
        assert_eq!(processed, 3);
        assert_eq!(w.state(), WorkerState::Finished);
        assert!(w.is_finished());
        assert_eq!(*link.submitted.lock().unwrap(), vec![Some(1), Some(2), Some(3)]);
        assert_eq!(w.table().value_by_name::<i32>("pf_n_pulses").unwrap(), 1);
    }

    #[test]
    fn test_prepare_without_calibration_assembles_output() {
        let link = QueueLink::new((0..2).map(trace).collect(), false);
        let mut w = worker(&analysis_chain());
        w.prepare(&link).unwrap();
        assert_eq!(w.resolved_output(), Some(EventSlot::Assembled));
        assert_eq!(w.output_event(EventSlot::Assembled).unwrap().type_tag(), "PulseEvent");

        assert_eq!(w.run_loop(&link).unwrap(), 2);
        assert_eq!(*link.submitted.lock().unwrap(), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_prepare_without_input_aborts() {
        let link = QueueLink::new(Vec::new(), true);
        let mut w = worker(&analysis_chain());
        let err = w.prepare(&link).unwrap_err();
        assert!(matches!(err, EngineError::Aborted { worker: 0, .. }));
        assert_eq!(w.state(), WorkerState::Aborted);
        assert!(w.is_finished());
    }

    #[test]
    fn test_run_loop_requires_calibration() {
        let link = QueueLink::new(vec![trace(0)], true);
        let mut w = worker(&analysis_chain());
        assert!(matches!(w.run_loop(&link), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn test_finalize_once() {
        let link = QueueLink::new((0..3).map(trace).collect(), true);
        let mut w = worker(&analysis_chain());
        w.prepare(&link).unwrap();
        w.run_loop(&link).unwrap();

        let report = w.finalize().unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].counters.events_in, 2);
        assert!(w.table().is_empty());
        assert!(w.output_event(EventSlot::Stage(1)).is_none());
        assert!(w.finalize().is_err());
    }

    #[test]
    fn test_extreme_verbosity_logs_rows() {
        let context = EngineContext::default().with_verbosity(Verbosity::Extreme);
        let chain = Chain::from_config(&analysis_chain(), &StageFactory::with_builtins()).unwrap();
        let mut w = Worker::new(WorkerId(0), chain, &context);
        let link = QueueLink::new((0..3).map(trace).collect(), true);
        w.prepare(&link).unwrap();
        assert_eq!(w.run_loop(&link).unwrap(), 2);
        assert_eq!(link.submitted.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_secondary_worker_verbosity_capped() {
        let context = EngineContext::default().with_verbosity(Verbosity::Debug);
        let w0 = Worker::new(WorkerId(0), Chain::new(), &context);
        let w1 = Worker::new(WorkerId(1), Chain::new(), &context);
        assert_eq!(w0.verbosity(), Verbosity::Debug);
        assert_eq!(w1.verbosity(), Verbosity::Essential);
    }
}
