//! Demo event types used by the built-in stages and the synthetic source.

use crate::event::{Event, EventHeader};
use serde::{Deserialize, Serialize};
use std::any::Any;

/// A digitised detector trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleEvent {
    pub header: EventHeader,
    pub samples: Vec<f64>,
}

impl SampleEvent {
    pub const TYPE_TAG: &'static str = "SampleEvent";

    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self {
            header: EventHeader::default(),
            samples,
        }
    }

    /// Builder-style id setter, handy for sources and tests.
    pub fn with_id(mut self, id: i32) -> Self {
        self.header.id = id;
        self
    }
}

impl Event for SampleEvent {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EventHeader {
        &mut self.header
    }

    fn initialize(&mut self) {
        self.header = EventHeader::default();
        self.samples.clear();
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A pulse found in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    /// Sample index of the maximum.
    pub position: usize,
    /// Height above baseline.
    pub amplitude: f64,
    /// Number of consecutive samples above threshold.
    pub width: usize,
}

/// Pulses reconstructed from a [`SampleEvent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseEvent {
    pub header: EventHeader,
    pub pulses: Vec<Pulse>,
}

impl PulseEvent {
    pub const TYPE_TAG: &'static str = "PulseEvent";

    pub fn max_amplitude(&self) -> f64 {
        self.pulses
            .iter()
            .map(|p| p.amplitude)
            .fold(0.0, f64::max)
    }
}

impl Event for PulseEvent {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn header(&self) -> &EventHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EventHeader {
        &mut self.header
    }

    fn initialize(&mut self) {
        self.header = EventHeader::default();
        self.pulses.clear();
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
