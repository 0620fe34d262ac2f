//! Per-stage event counters.
//!
//! Each worker owns one [`StageCounters`] per stage and is the only writer.
//! Sibling workers running the same stage hold an `Arc` to it (a "parallel"
//! link) and only read, so the counters can be summed for reporting while
//! the workers are still running.

use serde::Serialize;
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct StageCounters {
    events_in: AtomicU64,
    events_out: AtomicU64,
    cut: AtomicU64,
    nulls: AtomicU64,
    busy_us: AtomicU64,
}

impl StageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_out(&self) {
        self.events_out.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_cut(&self) {
        self.cut.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_null(&self) {
        self.nulls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_busy(&self, elapsed: Duration) {
        self.busy_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Zero everything. Used after the calibration run.
    pub(crate) fn reset(&self) {
        self.events_in.store(0, Ordering::Relaxed);
        self.events_out.store(0, Ordering::Relaxed);
        self.cut.store(0, Ordering::Relaxed);
        self.nulls.store(0, Ordering::Relaxed);
        self.busy_us.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_in: self.events_in.load(Ordering::Relaxed),
            events_out: self.events_out.load(Ordering::Relaxed),
            cut: self.cut.load(Ordering::Relaxed),
            nulls: self.nulls.load(Ordering::Relaxed),
            busy_us: self.busy_us.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of a [`StageCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub events_in: u64,
    pub events_out: u64,
    /// Events discarded by a cut.
    pub cut: u64,
    /// Events the stage itself discarded.
    pub nulls: u64,
    pub busy_us: u64,
}

impl CounterSnapshot {
    /// Mean time per event in microseconds.
    pub fn mean_us(&self) -> f64 {
        if self.events_in == 0 {
            0.0
        } else {
            self.busy_us as f64 / self.events_in as f64
        }
    }
}

impl Add for CounterSnapshot {
    type Output = CounterSnapshot;

    fn add(self, other: CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            events_in: self.events_in + other.events_in,
            events_out: self.events_out + other.events_out,
            cut: self.cut + other.cut,
            nulls: self.nulls + other.nulls,
            busy_us: self.busy_us + other.busy_us,
        }
    }
}

impl std::iter::Sum for CounterSnapshot {
    fn sum<I: Iterator<Item = CounterSnapshot>>(iter: I) -> Self {
        iter.fold(CounterSnapshot::default(), Add::add)
    }
}
