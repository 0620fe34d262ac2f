//! # EventFlow-RS: multi-worker event processing chains
//!
//! An event-processing engine for detector data. Each worker thread drives
//! raw events through an ordered chain of stages; every stage records its
//! per-event measurements ("observables") in the worker's dynamically typed
//! table, which is handed to the runner together with the processed event.
//!
//! ## Architecture
//!
//! - **Observables**: [`ObservableTable`] of [`TypedCell`]s, schema built at
//!   startup and locked before the first event
//! - **Stages**: the [`Stage`] trait plus the shared per-stage bookkeeping in
//!   [`StageSlot`] (observables, cuts, validation, counters)
//! - **Workers**: a [`Worker`] validates its [`Chain`], calibrates, then loops
//!   over input events through a [`RunnerLink`]
//! - **Runner**: [`ProcessRunner`] owns the source, the sink, and one thread per
//!   worker; progress flows back over crossbeam channels
//!
//! ## Configuration
//!
//! Pipelines are TOML files (see [`PipelineConfig`]): a `[runner]` section and
//! an ordered `[[stages]]` list with observables, cuts, and parameters.
//!
//! ## Example
//!
//! ```no_run
//! use eventflow_rs::{
//!     EngineContext, JsonLinesSink, PipelineConfig, ProcessRunner, SyntheticConfig,
//!     SyntheticSource,
//! };
//!
//! fn main() -> eventflow_rs::Result<()> {
//!     let config = PipelineConfig::load("pipeline.toml")?;
//!     let runner = ProcessRunner::new(config, EngineContext::default());
//!     let source = SyntheticSource::new(SyntheticConfig::default());
//!     let summary = runner.run(Box::new(source), Box::new(JsonLinesSink::stdout()))?;
//!     eprintln!("{} events written", summary.events_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod observable;
pub mod runner;
pub mod stage;
pub mod worker;

// Re-export commonly used types
pub use config::{PipelineConfig, RunnerConfig, StageConfig, Verbosity};
pub use context::EngineContext;
pub use error::{EngineError, Result, ResultExt};
pub use event::{Event, EventHeader, EventRegistry, ANY_EVENT};
pub use observable::{ObservableId, ObservableTable, TableRow, TypeRegistry, TypedCell, WorkerId};
pub use runner::{
    EventSource, JsonLinesSink, MemorySink, ProcessRunner, ResultSink, RunSummary, SyntheticConfig,
    SyntheticSource, VecSource,
};
pub use stage::{Outcome, OutputSlot, Stage, StageContext, StageFactory, StageSlot};
pub use worker::{Chain, RunnerLink, Worker, WorkerReport, WorkerState};
