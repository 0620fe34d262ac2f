//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod stages;

use eventflow_rs::event::EventHeader;
use eventflow_rs::{Event, ObservableTable, RunnerLink, TableRow, WorkerId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// One call to `submit_result`.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub worker: WorkerId,
    pub header: Option<EventHeader>,
    pub type_tag: Option<&'static str>,
    pub row: TableRow,
}

/// In-memory [`RunnerLink`] over a queue of events.
///
/// Calibration attempts peek into the queue without consuming it, so every
/// queued event is still processed by the run loop.
pub struct QueueLink {
    sample: Mutex<Box<dyn Event>>,
    queue: Mutex<VecDeque<Box<dyn Event>>>,
    calibration: bool,
    calibration_fetches: AtomicUsize,
    submitted: Mutex<Vec<Submitted>>,
}

impl QueueLink {
    pub fn new<E: Event + Default>(events: Vec<E>) -> Self {
        Self {
            sample: Mutex::new(Box::new(E::default())),
            queue: Mutex::new(events.into_iter().map(|e| Box::new(e) as Box<dyn Event>).collect()),
            calibration: true,
            calibration_fetches: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn without_calibration(mut self) -> Self {
        self.calibration = false;
        self
    }

    pub fn calibration_fetches(&self) -> usize {
        self.calibration_fetches.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }

    /// Ids of submitted events, `None` for discards.
    pub fn submitted_ids(&self) -> Vec<Option<i32>> {
        self.submitted()
            .iter()
            .map(|s| s.header.as_ref().map(|h| h.id))
            .collect()
    }
}

impl RunnerLink for QueueLink {
    fn sample_input_event(&self) -> Option<Box<dyn Event>> {
        Some(self.sample.lock().unwrap().clone_event())
    }

    fn uses_calibration_run(&self) -> bool {
        self.calibration
    }

    fn fetch_next_input(&self, input: &mut Box<dyn Event>, _table: &mut ObservableTable) -> bool {
        match self.queue.lock().unwrap().pop_front() {
            Some(event) => {
                *input = event;
                true
            }
            None => false,
        }
    }

    fn fetch_calibration_input(
        &self,
        attempt: usize,
        input: &mut Box<dyn Event>,
        _table: &mut ObservableTable,
    ) -> bool {
        self.calibration_fetches.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().get(attempt) {
            Some(event) => {
                *input = event.clone_event();
                true
            }
            None => false,
        }
    }

    fn submit_result(&self, worker: WorkerId, output: Option<&dyn Event>, table: &ObservableTable) {
        self.submitted.lock().unwrap().push(Submitted {
            worker,
            header: output.map(|e| e.header().clone()),
            type_tag: output.map(|e| e.type_tag()),
            row: table.row(),
        });
    }
}
