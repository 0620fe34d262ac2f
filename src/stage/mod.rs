//! Stage abstraction for processing chains.
//!
//! A stage consumes one event, optionally produces another, and may write
//! observables into its worker's table. Concrete stages implement the
//! [`Stage`] trait; everything shared by all stages (observable
//! registration, cuts, completeness validation, counters) lives in
//! [`StageSlot`].
//!
//! # Lifecycle
//!
//! `new` → `init` → (`begin_event` → `process` → `apply_cut` → `end_event`)* → `finalize`
//!
//! A calibration run adds a dry-run pass of events followed by a second
//! `init` before the loop.
//!
//! The worker drives these calls and guarantees the order.

pub mod builtin;
pub mod context;
pub mod counters;
pub mod factory;
pub mod output;
pub mod slot;

pub use context::{FinalizeContext, Friends, StageContext};
pub use counters::{CounterSnapshot, StageCounters};
pub use factory::{StageConstructor, StageFactory};
pub use output::OutputSlot;
pub use slot::{Handoff, StageSlot, StageState};

use crate::error::Result;
use crate::event::{Event, ANY_EVENT};
use std::any::Any;

/// What `process` did with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The input event (possibly modified in place) goes on.
    Forward,
    /// The stage's own output event goes on. The output slot must be bound.
    Emit,
    /// Nothing goes on; the event is dropped from here downstream.
    Discard,
}

/// A unit of a processing chain.
///
/// Each worker builds its own instances, so implementations need no
/// internal synchronization.
pub trait Stage: Send {
    /// Stage kind, as named in pipeline files.
    fn kind(&self) -> &'static str;

    /// Event type this stage accepts; [`ANY_EVENT`] for any.
    fn input_type(&self) -> &'static str {
        ANY_EVENT
    }

    /// Event type this stage produces; [`ANY_EVENT`] for any.
    fn output_type(&self) -> &'static str {
        ANY_EVENT
    }

    /// Called after every stage's configured observables are registered and
    /// before the first event. Friends are available here.
    ///
    /// With a calibration run it is called again once calibration succeeds.
    /// Anything a stage accumulates across events must be reset here.
    ///
    /// An error aborts the worker.
    fn init(&mut self, _ctx: &mut StageContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Process one event.
    fn process(
        &mut self,
        input: &mut dyn Event,
        output: &mut OutputSlot,
        ctx: &mut StageContext<'_>,
    ) -> Outcome;

    /// Called once after the last event.
    fn finalize(&mut self, _ctx: &FinalizeContext<'_>) {}

    /// Stages that keep state across events in a way that is only valid
    /// with one worker return true; the runner then uses a single worker.
    fn single_thread_only(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}
