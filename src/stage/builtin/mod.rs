//! Built-in stages.

pub mod passthrough;
pub mod pulse_finder;
pub mod sample_analysis;

pub use passthrough::PassThrough;
pub use pulse_finder::PulseFinder;
pub use sample_analysis::SampleAnalysis;

/// Mean of the first `n` samples, or 0 for an empty trace.
pub(crate) fn baseline(samples: &[f64], n: usize) -> f64 {
    let head = &samples[..n.min(samples.len())];
    if head.is_empty() {
        0.0
    } else {
        head.iter().sum::<f64>() / head.len() as f64
    }
}
