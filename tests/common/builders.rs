//! Test data builders for creating test objects

use eventflow_rs::event::SampleEvent;

/// Builder for synthetic traces: flat baseline plus rectangular pulses
pub struct TraceBuilder {
    len: usize,
    baseline: f64,
    pulses: Vec<(usize, usize, f64)>,
    id: i32,
}

impl TraceBuilder {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            baseline: 0.0,
            pulses: Vec::new(),
            id: 0,
        }
    }

    pub fn baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    /// Rectangular pulse of `height` above baseline.
    pub fn pulse(mut self, start: usize, width: usize, height: f64) -> Self {
        self.pulses.push((start, width, height));
        self
    }

    pub fn id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn build(self) -> SampleEvent {
        let mut samples = vec![self.baseline; self.len];
        for (start, width, height) in self.pulses {
            for sample in samples.iter_mut().skip(start).take(width) {
                *sample += height;
            }
        }
        SampleEvent::from_samples(samples).with_id(self.id)
    }
}

/// Events carrying only an id.
pub fn events_with_ids(ids: impl IntoIterator<Item = i32>) -> Vec<SampleEvent> {
    ids.into_iter()
        .map(|id| SampleEvent::default().with_id(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_builder() {
        let trace = TraceBuilder::new(10).baseline(1.0).pulse(3, 2, 5.0).id(4).build();
        assert_eq!(trace.header.id, 4);
        assert_eq!(trace.samples[2], 1.0);
        assert_eq!(trace.samples[3], 6.0);
        assert_eq!(trace.samples[4], 6.0);
        assert_eq!(trace.samples[5], 1.0);
    }
}
