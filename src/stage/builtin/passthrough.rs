//! PassThrough: forwards every event unchanged.
//!
//! Accepts and produces any event type, so chain validation skips it.

use crate::config::StageConfig;
use crate::error::Result;
use crate::event::Event;
use crate::stage::{OutputSlot, Outcome, Stage, StageContext};
use std::any::Any;

#[derive(Debug, Default)]
pub struct PassThrough;

impl PassThrough {
    pub const KIND: &'static str = "PassThrough";

    pub fn new() -> Self {
        Self
    }

    pub fn from_config(_config: &StageConfig) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self::new()))
    }
}

impl Stage for PassThrough {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(
        &mut self,
        _input: &mut dyn Event,
        _output: &mut OutputSlot,
        _ctx: &mut StageContext<'_>,
    ) -> Outcome {
        Outcome::Forward
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
