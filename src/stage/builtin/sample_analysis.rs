//! SampleAnalysis: summary observables of a raw trace.
//!
//! Works in place on a [`SampleEvent`]. Observables (local names):
//!
//! | name | type | meaning |
//! |---|---|---|
//! | `baseline` | double | mean of the first `baseline_samples` samples |
//! | `sum` | double | integral above baseline |
//! | `max` | double | largest sample |
//! | `min` | double | smallest sample |
//! | `n_samples` | int | trace length |
//!
//! Empty traces are discarded.

use crate::config::StageConfig;
use crate::error::Result;
use crate::event::{Event, SampleEvent};
use crate::stage::builtin::baseline;
use crate::stage::{OutputSlot, Outcome, Stage, StageContext};
use std::any::Any;

pub const DEFAULT_BASELINE_SAMPLES: usize = 20;

#[derive(Debug)]
pub struct SampleAnalysis {
    baseline_samples: usize,
}

impl SampleAnalysis {
    pub const KIND: &'static str = "SampleAnalysis";

    pub fn new(baseline_samples: usize) -> Self {
        Self {
            baseline_samples: baseline_samples.max(1),
        }
    }

    pub fn from_config(config: &StageConfig) -> Result<Box<dyn Stage>> {
        let n = config.parameter_i64("baseline_samples", DEFAULT_BASELINE_SAMPLES as i64);
        Ok(Box::new(Self::new(n.max(1) as usize)))
    }

    /// Number of leading samples averaged into the baseline.
    pub fn baseline_samples(&self) -> usize {
        self.baseline_samples
    }
}

impl Stage for SampleAnalysis {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn input_type(&self) -> &'static str {
        SampleEvent::TYPE_TAG
    }

    fn output_type(&self) -> &'static str {
        SampleEvent::TYPE_TAG
    }

    fn process(
        &mut self,
        input: &mut dyn Event,
        _output: &mut OutputSlot,
        ctx: &mut StageContext<'_>,
    ) -> Outcome {
        let Some(event) = input.downcast_ref::<SampleEvent>() else {
            return Outcome::Discard;
        };
        if event.samples.is_empty() {
            return Outcome::Discard;
        }

        let base = baseline(&event.samples, self.baseline_samples);
        let sum: f64 = event.samples.iter().map(|s| s - base).sum();
        let max = event.samples.iter().copied().fold(f64::MIN, f64::max);
        let min = event.samples.iter().copied().fold(f64::MAX, f64::min);
        let n = event.samples.len() as i32;

        ctx.set_observable("baseline", base);
        ctx.set_observable("sum", sum);
        ctx.set_observable("max", max);
        ctx.set_observable("min", min);
        ctx.set_observable("n_samples", n);

        Outcome::Forward
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = StageConfig::new(SampleAnalysis::KIND, "sAna").with_parameter("baseline_samples", 4);
        let stage = SampleAnalysis::from_config(&config).unwrap();
        let analysis = stage.as_any().downcast_ref::<SampleAnalysis>().unwrap();
        assert_eq!(analysis.baseline_samples(), 4);
    }

    #[test]
    fn test_baseline_samples_at_least_one() {
        assert_eq!(SampleAnalysis::new(0).baseline_samples(), 1);
    }
}
