//! Reference runner: a pool of workers over one source and one sink.
//!
//! The runner owns everything the workers share. Input and output sit
//! behind their own mutex inside [`SharedLink`], which is the
//! [`RunnerLink`] every worker receives, so a fetch or a submit is one
//! event's worth of serialized work.
//!
//! # Lifecycle
//!
//! 1. Build one chain and one [`Worker`] per thread.
//! 2. Prepare every worker on the calling thread. Calibration events are
//!    peeked, not consumed, so every worker calibrates on the same events and
//!    they are processed normally afterwards.
//! 3. Link per-stage counters across workers.
//! 4. Spawn one named thread per worker and poll their finished flags,
//!    logging progress at a fixed interval.
//! 5. Join, finalize each worker in id order, flush the sink.

pub mod sink;
pub mod source;

pub use sink::{JsonLinesSink, MemorySink, ResultSink};
pub use source::{EventSource, SourceRecord, SyntheticConfig, SyntheticSource, VecSource};

use crate::config::{PipelineConfig, RunnerConfig, StageConfig};
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::observable::{ObservableTable, WorkerId};
use crate::worker::{Chain, RunnerLink, Worker, WorkerReport};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Messages from worker threads to the runner.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Started { worker: WorkerId },
    Finished { worker: WorkerId, processed: u64 },
    Failed { worker: WorkerId, error: String },
}

/// Totals of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub events_read: u64,
    pub events_written: u64,
    pub events_discarded: u64,
    pub elapsed_ms: u64,
    pub workers: Vec<WorkerReport>,
}

impl RunSummary {
    pub fn events_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }
}

// ==================== Shared link ====================

struct InputState {
    source: Box<dyn EventSource>,
    /// Records pulled from the source but not yet handed out.
    lookahead: VecDeque<SourceRecord>,
    skip: u64,
    limit: u64,
    pulled: u64,
}

impl InputState {
    fn pull(&mut self) -> Option<SourceRecord> {
        if self.skip > 0 {
            let skipped = self.source.skip(self.skip);
            tracing::debug!("Skipped {} entries of {}", skipped, self.source.name());
            self.skip = 0;
        }
        if self.limit > 0 && self.pulled >= self.limit {
            return None;
        }
        let record = self.source.next_record()?;
        self.pulled += 1;
        Some(record)
    }

    /// Make sure the lookahead holds at least `count` records.
    fn fill(&mut self, count: usize) -> bool {
        while self.lookahead.len() < count {
            match self.pull() {
                Some(record) => self.lookahead.push_back(record),
                None => return false,
            }
        }
        true
    }
}

struct OutputState {
    sink: Box<dyn ResultSink>,
    written: u64,
    discarded: u64,
    error: Option<EngineError>,
}

/// The [`RunnerLink`] shared by all workers of one run.
pub struct SharedLink {
    input: Mutex<InputState>,
    output: Mutex<OutputState>,
    input_names: Vec<String>,
    calibration: bool,
    stop: Arc<AtomicBool>,
}

impl SharedLink {
    fn new(
        source: Box<dyn EventSource>,
        sink: Box<dyn ResultSink>,
        config: &RunnerConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let input_names = source.observable_names();
        Self {
            input: Mutex::new(InputState {
                source,
                lookahead: VecDeque::new(),
                skip: config.first_entry,
                limit: config.events_to_process,
                pulled: 0,
            }),
            output: Mutex::new(OutputState {
                sink,
                written: 0,
                discarded: 0,
                error: None,
            }),
            input_names,
            calibration: config.calibration_run,
            stop,
        }
    }

    fn input(&self) -> Option<MutexGuard<'_, InputState>> {
        match self.input.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Input lock poisoned");
                self.stop.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    fn output(&self) -> Option<MutexGuard<'_, OutputState>> {
        match self.output.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Output lock poisoned");
                self.stop.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    pub fn events_read(&self) -> u64 {
        self.input().map_or(0, |input| input.pulled)
    }

    pub fn events_written(&self) -> u64 {
        self.output().map_or(0, |output| output.written)
    }

    fn load(
        event: Box<dyn Event>,
        observables: &[(String, f64)],
        input: &mut Box<dyn Event>,
        table: &mut ObservableTable,
    ) {
        *input = event;
        for (name, value) in observables {
            if let Err(e) = table.set_value_by_name(name, *value) {
                tracing::debug!("Input observable '{}' not stored: {}", name, e);
            }
        }
    }
}

impl RunnerLink for SharedLink {
    fn sample_input_event(&self) -> Option<Box<dyn Event>> {
        self.input().map(|input| input.source.sample_event())
    }

    fn uses_calibration_run(&self) -> bool {
        self.calibration
    }

    fn input_observables(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn fetch_next_input(&self, input: &mut Box<dyn Event>, table: &mut ObservableTable) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            return false;
        }
        let Some(mut state) = self.input() else {
            return false;
        };
        let record = match state.lookahead.pop_front() {
            Some(record) => record,
            None => match state.pull() {
                Some(record) => record,
                None => return false,
            },
        };
        drop(state);

        Self::load(record.event, &record.observables, input, table);
        true
    }

    fn fetch_calibration_input(
        &self,
        attempt: usize,
        input: &mut Box<dyn Event>,
        table: &mut ObservableTable,
    ) -> bool {
        let Some(mut state) = self.input() else {
            return false;
        };
        if !state.fill(attempt + 1) {
            return false;
        }
        let Some(record) = state.lookahead.get(attempt) else {
            return false;
        };
        Self::load(record.event.clone_event(), &record.observables, input, table);
        true
    }

    fn submit_result(&self, worker: WorkerId, output: Option<&dyn Event>, table: &ObservableTable) {
        let Some(mut state) = self.output() else {
            return;
        };
        let Some(event) = output else {
            state.discarded += 1;
            return;
        };
        match state.sink.write(table.row(), event) {
            Ok(()) => state.written += 1,
            Err(e) => {
                tracing::error!("Worker {}: cannot write event {}: {}", worker, event.id(), e);
                if state.error.is_none() {
                    state.error = Some(e);
                }
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }
}

// ==================== Runner ====================

/// Runs a pipeline over a source with a pool of worker threads.
pub struct ProcessRunner {
    config: RunnerConfig,
    stages: Vec<StageConfig>,
    context: EngineContext,
    stop: Arc<AtomicBool>,
}

impl ProcessRunner {
    pub fn new(config: PipelineConfig, context: EngineContext) -> Self {
        let verbosity = config.runner.verbosity.max(context.verbosity);
        Self {
            config: config.runner,
            stages: config.stages,
            context: context.with_verbosity(verbosity),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting this flag makes every worker stop at its next fetch.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn build_workers(&self) -> Result<Vec<Worker>> {
        let first = Chain::from_config(&self.stages, &self.context.stages)?;
        let mut threads = self.config.effective_threads();
        if threads > 1 && first.single_thread_only() {
            tracing::warn!("A stage requires single-threaded processing, using 1 worker");
            threads = 1;
        }

        let mut workers = vec![Worker::new(WorkerId(0), first, &self.context)];
        for id in 1..threads {
            let chain = Chain::from_config(&self.stages, &self.context.stages)?;
            workers.push(Worker::new(WorkerId(id as u32), chain, &self.context));
        }
        Ok(workers)
    }

    /// Give every stage the counters of its copies in the other workers.
    fn link_parallels(workers: &mut [Worker]) {
        let stage_count = workers.first().map_or(0, |w| w.chain().len());
        for k in 0..stage_count {
            let all: Vec<_> = workers
                .iter()
                .filter_map(|w| w.chain().slot(k).map(|slot| slot.counters().clone()))
                .collect();
            for (i, worker) in workers.iter_mut().enumerate() {
                let others = all
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, counters)| counters.clone())
                    .collect();
                if let Some(slot) = worker.chain_mut().slot_mut(k) {
                    slot.set_parallels(others);
                }
            }
        }
    }

    pub fn run(&self, source: Box<dyn EventSource>, sink: Box<dyn ResultSink>) -> Result<RunSummary> {
        let started = Instant::now();
        tracing::info!(
            "Starting run: {} stages, source '{}', {} thread(s) requested",
            self.stages.len(),
            source.name(),
            self.config.effective_threads()
        );

        let link = Arc::new(SharedLink::new(source, sink, &self.config, self.stop.clone()));
        let mut workers = self.build_workers()?;

        for worker in &mut workers {
            if let Err(e) = worker.prepare(link.as_ref()) {
                self.stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }
        Self::link_parallels(&mut workers);

        let (tx, rx) = crossbeam_channel::unbounded();
        let flags: Vec<Arc<AtomicBool>> = workers.iter().map(Worker::finished_flag).collect();
        let mut handles = Vec::with_capacity(workers.len());
        for worker in workers {
            handles.push(spawn_worker(worker, link.clone(), tx.clone())?);
        }
        drop(tx);

        self.monitor(&rx, &flags, &link);

        let mut workers = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(worker) => workers.push(worker),
                Err(_) => {
                    self.stop.store(true, Ordering::SeqCst);
                    return Err(EngineError::InvalidState("worker thread panicked".into()));
                }
            }
        }
        workers.sort_by_key(Worker::id);

        let mut reports = Vec::with_capacity(workers.len());
        for worker in &mut workers {
            reports.push(worker.finalize()?);
        }

        let (written, discarded) = {
            let mut output = link
                .output
                .lock()
                .map_err(|_| EngineError::InvalidState("output lock poisoned".into()))?;
            if let Some(e) = output.error.take() {
                return Err(e);
            }
            output.sink.flush()?;
            (output.written, output.discarded)
        };

        let summary = RunSummary {
            events_read: link.events_read(),
            events_written: written,
            events_discarded: discarded,
            elapsed_ms: started.elapsed().as_millis() as u64,
            workers: reports,
        };
        tracing::info!(
            "Run finished: {} read, {} written, {} discarded in {} ms",
            summary.events_read,
            summary.events_written,
            summary.events_discarded,
            summary.elapsed_ms
        );
        Ok(summary)
    }

    fn monitor(&self, rx: &Receiver<WorkerMessage>, flags: &[Arc<AtomicBool>], link: &SharedLink) {
        let interval = Duration::from_millis(self.config.progress_interval_ms.max(10));
        let started = Instant::now();

        while flags.iter().any(|flag| !flag.load(Ordering::Acquire)) {
            match rx.recv_timeout(interval) {
                Ok(WorkerMessage::Started { worker }) => {
                    tracing::debug!("Worker {} started", worker);
                }
                Ok(WorkerMessage::Finished { worker, processed }) => {
                    tracing::debug!("Worker {} done after {} events", worker, processed);
                }
                Ok(WorkerMessage::Failed { worker, error }) => {
                    tracing::error!("Worker {} failed: {}", worker, error);
                    self.stop.store(true, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let written = link.events_written();
                    let seconds = started.elapsed().as_secs_f64().max(1e-9);
                    tracing::info!(
                        "Progress: {} read, {} written, {:.1} events/s",
                        link.events_read(),
                        written,
                        written as f64 / seconds
                    );
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

fn spawn_worker(
    mut worker: Worker,
    link: Arc<SharedLink>,
    tx: Sender<WorkerMessage>,
) -> Result<JoinHandle<Worker>> {
    let id = worker.id();
    let handle = std::thread::Builder::new()
        .name(format!("worker-{}", id))
        .spawn(move || {
            let _ = tx.send(WorkerMessage::Started { worker: id });
            let message = match worker.run_loop(link.as_ref()) {
                Ok(processed) => WorkerMessage::Finished { worker: id, processed },
                Err(e) => WorkerMessage::Failed {
                    worker: id,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(message);
            worker
        })?;
    Ok(handle)
}
