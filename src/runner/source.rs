//! Input event sources.

use crate::event::{Event, SampleEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::TAU;

/// One input event plus the observables the source computed for it.
#[derive(Debug)]
pub struct SourceRecord {
    pub event: Box<dyn Event>,
    pub observables: Vec<(String, f64)>,
}

impl SourceRecord {
    pub fn new(event: Box<dyn Event>) -> Self {
        Self {
            event,
            observables: Vec::new(),
        }
    }

    pub fn with_observable(mut self, name: impl Into<String>, value: f64) -> Self {
        self.observables.push((name.into(), value));
        self
    }
}

/// Sequential reader of input events. Only ever called under the runner's
/// input lock.
pub trait EventSource: Send {
    /// Short name for log lines.
    fn name(&self) -> &str;

    /// A fresh, empty event of the type this source produces.
    fn sample_event(&self) -> Box<dyn Event>;

    /// Names of the observables attached to every record.
    fn observable_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Next record, or `None` at end of input.
    fn next_record(&mut self) -> Option<SourceRecord>;

    /// Drop `count` records. Returns how many were actually skipped.
    fn skip(&mut self, count: u64) -> u64 {
        let mut skipped = 0;
        while skipped < count && self.next_record().is_some() {
            skipped += 1;
        }
        skipped
    }
}

/// Source over a prepared list of records.
#[derive(Debug)]
pub struct VecSource {
    sample: Box<dyn Event>,
    names: Vec<String>,
    records: VecDeque<SourceRecord>,
}

impl VecSource {
    pub fn new(sample: Box<dyn Event>, records: Vec<SourceRecord>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for record in &records {
            for (name, _) in &record.observables {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        Self {
            sample,
            names,
            records: records.into(),
        }
    }

    /// Source of bare events without input observables.
    pub fn from_events<E: Event + Default>(events: Vec<E>) -> Self {
        let records = events
            .into_iter()
            .map(|event| SourceRecord::new(Box::new(event)))
            .collect();
        Self::new(Box::new(E::default()), records)
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl EventSource for VecSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn sample_event(&self) -> Box<dyn Event> {
        let mut event = self.sample.clone_event();
        event.initialize();
        event
    }

    fn observable_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn next_record(&mut self) -> Option<SourceRecord> {
        self.records.pop_front()
    }
}

/// Settings of a [`SyntheticSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub events: u64,
    pub samples: usize,
    pub seed: u64,
    pub baseline: f64,
    /// Amplitude of the slow sine on the baseline.
    pub ripple: f64,
    pub noise: f64,
    pub max_pulses: usize,
    pub pulse_amplitude: (f64, f64),
    pub pulse_width: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            events: 100,
            samples: 512,
            seed: 1,
            baseline: 250.0,
            ripple: 2.0,
            noise: 1.0,
            max_pulses: 3,
            pulse_amplitude: (40.0, 400.0),
            pulse_width: 6,
        }
    }
}

/// Deterministic generator of [`SampleEvent`] traces.
///
/// Each trace is a sine-rippled baseline with uniform noise and up to
/// `max_pulses` triangular pulses, placed after the first quarter of the
/// trace so the baseline window stays clean. The true pulse count is
/// reported as the input observable `source_true_pulses`.
#[derive(Debug)]
pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    produced: u64,
}

impl SyntheticSource {
    pub const TRUE_PULSES: &'static str = "source_true_pulses";

    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            produced: 0,
        }
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn trace(&mut self) -> (Vec<f64>, usize) {
        let cfg = &self.config;
        let n = cfg.samples.max(1);
        let phase = self.rng.random_range(0.0..TAU);

        let mut samples: Vec<f64> = (0..n)
            .map(|i| {
                let ripple = cfg.ripple * (phase + TAU * i as f64 / n as f64).sin();
                let noise = if cfg.noise > 0.0 {
                    self.rng.random_range(-cfg.noise..cfg.noise)
                } else {
                    0.0
                };
                cfg.baseline + ripple + noise
            })
            .collect();

        let start = n / 4;
        let width = cfg.pulse_width.max(1);
        if cfg.max_pulses == 0 || start + 2 * width >= n {
            return (samples, 0);
        }

        let pulses = self.rng.random_range(0..=cfg.max_pulses);
        // Pulses get disjoint windows so the true count stays meaningful.
        let window = (n - start) / cfg.max_pulses;
        for p in 0..pulses {
            let lo = start + p * window;
            let hi = (lo + window).saturating_sub(2 * width).max(lo + 1);
            let peak_at = self.rng.random_range(lo..hi);
            let (min_amp, max_amp) = cfg.pulse_amplitude;
            let amplitude = if max_amp > min_amp {
                self.rng.random_range(min_amp..max_amp)
            } else {
                min_amp
            };
            for offset in 0..2 * width {
                let Some(sample) = samples.get_mut(peak_at + offset) else {
                    break;
                };
                let distance = offset.abs_diff(width) as f64;
                *sample += amplitude * (1.0 - distance / width as f64).max(0.0);
            }
        }
        (samples, pulses)
    }
}

impl EventSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn sample_event(&self) -> Box<dyn Event> {
        Box::new(SampleEvent::default())
    }

    fn observable_names(&self) -> Vec<String> {
        vec![Self::TRUE_PULSES.to_string()]
    }

    fn next_record(&mut self) -> Option<SourceRecord> {
        if self.produced >= self.config.events {
            return None;
        }
        let (samples, pulses) = self.trace();
        let mut event = SampleEvent::from_samples(samples).with_id(self.produced as i32);
        event.header.timestamp = self.produced as f64 * 1e-3;
        self.produced += 1;

        Some(SourceRecord::new(Box::new(event)).with_observable(Self::TRUE_PULSES, pulses as f64))
    }
}
