//! The worker's only view of the outside world.
//!
//! A runner hands each worker a [`RunnerLink`]. Every method may be called
//! from several worker threads at once; the implementation serializes
//! access to the shared input and output. Workers add no locking of their
//! own around these calls.

use crate::event::Event;
use crate::observable::{ObservableTable, WorkerId};

pub trait RunnerLink: Send + Sync {
    /// A fresh instance of the event type the input provides, used to size
    /// the worker's input buffer and to validate the chain. `None` when the
    /// input cannot say.
    fn sample_input_event(&self) -> Option<Box<dyn Event>>;

    /// Whether workers resolve their output event with a calibration run.
    fn uses_calibration_run(&self) -> bool;

    /// Names of observables the input fills in for every event. Workers
    /// register them as `double` before the table is locked.
    fn input_observables(&self) -> Vec<String> {
        Vec::new()
    }

    /// Load the next input event (and its input observables). Blocks until
    /// the input is available; `false` means end of input.
    fn fetch_next_input(&self, input: &mut Box<dyn Event>, table: &mut ObservableTable) -> bool;

    /// Load an input event for calibration attempt `attempt`. Events handed
    /// out here are dry-run only and never submitted.
    fn fetch_calibration_input(
        &self,
        attempt: usize,
        input: &mut Box<dyn Event>,
        table: &mut ObservableTable,
    ) -> bool {
        let _ = attempt;
        self.fetch_next_input(input, table)
    }

    /// Hand back one processed event. `output` is `None` when the event was
    /// discarded; the table row is always provided.
    fn submit_result(&self, worker: WorkerId, output: Option<&dyn Event>, table: &ObservableTable);
}
