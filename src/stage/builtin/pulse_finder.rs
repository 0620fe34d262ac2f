//! PulseFinder: threshold pulse search on a raw trace.
//!
//! Turns a [`SampleEvent`] into a [`PulseEvent`]. The output event is
//! created on the first call and reused afterwards.
//!
//! Parameters: `threshold` (above baseline), `baseline_samples`, and
//! `min_width`. When `baseline_samples` is not configured it is taken from
//! a `SampleAnalysis` friend, if the chain has one.
//!
//! Observables: `n_pulses` (int), `max_amplitude` (double), `amplitudes`
//! (vector<double>).

use crate::config::StageConfig;
use crate::error::Result;
use crate::event::{Event, Pulse, PulseEvent, SampleEvent};
use crate::stage::builtin::{baseline, SampleAnalysis};
use crate::stage::{FinalizeContext, OutputSlot, Outcome, Stage, StageContext};
use std::any::Any;

pub const DEFAULT_THRESHOLD: f64 = 10.0;
pub const DEFAULT_BASELINE_SAMPLES: usize = 20;

#[derive(Debug)]
pub struct PulseFinder {
    threshold: f64,
    baseline_samples: usize,
    baseline_configured: bool,
    min_width: usize,
    events_with_pulses: u64,
}

impl PulseFinder {
    pub const KIND: &'static str = "PulseFinder";

    pub fn new(threshold: f64, baseline_samples: usize, min_width: usize) -> Self {
        Self {
            threshold,
            baseline_samples: baseline_samples.max(1),
            baseline_configured: true,
            min_width: min_width.max(1),
            events_with_pulses: 0,
        }
    }

    pub fn from_config(config: &StageConfig) -> Result<Box<dyn Stage>> {
        let mut finder = Self::new(
            config.parameter_f64("threshold", DEFAULT_THRESHOLD),
            config.parameter_i64("baseline_samples", DEFAULT_BASELINE_SAMPLES as i64).max(1) as usize,
            config.parameter_i64("min_width", 1).max(1) as usize,
        );
        finder.baseline_configured = config.parameter("baseline_samples").is_some();
        Ok(Box::new(finder))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn baseline_samples(&self) -> usize {
        self.baseline_samples
    }

    /// Events with at least one pulse since the last `init`.
    pub fn events_with_pulses(&self) -> u64 {
        self.events_with_pulses
    }

    /// Runs of consecutive samples above `baseline + threshold`.
    pub fn find_pulses(&self, samples: &[f64]) -> Vec<Pulse> {
        let base = baseline(samples, self.baseline_samples);
        let level = base + self.threshold;

        let mut pulses = Vec::new();
        let mut run: Option<(usize, usize, f64)> = None; // (start, peak position, peak value)

        for (i, &s) in samples.iter().enumerate() {
            if s > level {
                run = match run {
                    None => Some((i, i, s)),
                    Some((start, _, peak)) if s > peak => Some((start, i, s)),
                    keep => keep,
                };
            } else if let Some((start, position, peak)) = run.take() {
                self.close_run(&mut pulses, start, i, position, peak - base);
            }
        }
        if let Some((start, position, peak)) = run {
            self.close_run(&mut pulses, start, samples.len(), position, peak - base);
        }

        pulses
    }

    fn close_run(&self, pulses: &mut Vec<Pulse>, start: usize, end: usize, position: usize, amplitude: f64) {
        let width = end - start;
        if width >= self.min_width {
            pulses.push(Pulse {
                position,
                amplitude,
                width,
            });
        }
    }
}

impl Stage for PulseFinder {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn input_type(&self) -> &'static str {
        SampleEvent::TYPE_TAG
    }

    fn output_type(&self) -> &'static str {
        PulseEvent::TYPE_TAG
    }

    fn init(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        self.events_with_pulses = 0;
        if !self.baseline_configured {
            if let Some(analysis) = ctx.friend_as::<SampleAnalysis>(SampleAnalysis::KIND) {
                self.baseline_samples = analysis.baseline_samples();
                tracing::debug!(
                    "{}: baseline_samples = {} from SampleAnalysis",
                    ctx.stage_name(),
                    self.baseline_samples
                );
            }
        }
        Ok(())
    }

    fn process(
        &mut self,
        input: &mut dyn Event,
        output: &mut OutputSlot,
        ctx: &mut StageContext<'_>,
    ) -> Outcome {
        let Some(event) = input.downcast_ref::<SampleEvent>() else {
            return Outcome::Discard;
        };

        let pulses = self.find_pulses(&event.samples);
        let amplitudes: Vec<f64> = pulses.iter().map(|p| p.amplitude).collect();

        let out = output.get_or_insert::<PulseEvent>();
        out.pulses = pulses;
        let max_amplitude = out.max_amplitude();
        if !out.pulses.is_empty() {
            self.events_with_pulses += 1;
        }

        ctx.set_observable("n_pulses", amplitudes.len() as i32);
        ctx.set_observable("max_amplitude", max_amplitude);
        ctx.set_observable("amplitudes", amplitudes);

        Outcome::Emit
    }

    fn finalize(&mut self, ctx: &FinalizeContext<'_>) {
        let own = ctx.own();
        tracing::info!(
            "{} [{}]: {} of {} events had pulses",
            ctx.stage_name(),
            ctx.worker(),
            self.events_with_pulses,
            own.events_in
        );
        if ctx.worker().is_primary() && ctx.parallel_count() > 0 {
            let total = ctx.aggregate();
            tracing::info!(
                "{}: {} events over {} workers, {:.1} us/event",
                ctx.stage_name(),
                total.events_in,
                ctx.parallel_count() + 1,
                total.mean_us()
            );
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
