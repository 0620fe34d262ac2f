//! Small stages and events for driving workers in tests

use eventflow_rs::error::Result;
use eventflow_rs::event::{EventHeader, SampleEvent, ANY_EVENT};
use eventflow_rs::{
    EngineContext, Event, EventRegistry, Outcome, OutputSlot, Stage, StageConfig, StageContext,
    StageFactory, TypeRegistry,
};
use std::any::Any;

/// Declares a payload-free event type with the given tag.
macro_rules! tag_event {
    ($name:ident, $tag:expr) => {
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub header: EventHeader,
        }

        impl Event for $name {
            fn type_tag(&self) -> &'static str {
                $tag
            }
            fn header(&self) -> &EventHeader {
                &self.header
            }
            fn header_mut(&mut self) -> &mut EventHeader {
                &mut self.header
            }
            fn initialize(&mut self) {
                self.header = EventHeader::default();
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
    };
}

tag_event!(AEvent, "A");
tag_event!(BEvent, "B");

/// Sets observable `x` to the input event's id.
#[derive(Debug, Default)]
pub struct IdRecorder;

impl IdRecorder {
    pub const KIND: &'static str = "IdRecorder";

    pub fn from_config(_: &StageConfig) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self))
    }
}

impl Stage for IdRecorder {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&mut self, input: &mut dyn Event, _: &mut OutputSlot, ctx: &mut StageContext<'_>) -> Outcome {
        ctx.set_observable("x", input.id() as f64);
        Outcome::Forward
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct DropAll;

impl DropAll {
    pub const KIND: &'static str = "DropAll";

    pub fn from_config(_: &StageConfig) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self))
    }
}

impl Stage for DropAll {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&mut self, _: &mut dyn Event, _: &mut OutputSlot, _: &mut StageContext<'_>) -> Outcome {
        Outcome::Discard
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Forwards its input but refuses to share the run with other workers.
#[derive(Debug, Default)]
pub struct Serial;

impl Serial {
    pub const KIND: &'static str = "Serial";

    pub fn from_config(_: &StageConfig) -> Result<Box<dyn Stage>> {
        Ok(Box::new(Self))
    }
}

impl Stage for Serial {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn process(&mut self, _: &mut dyn Event, _: &mut OutputSlot, _: &mut StageContext<'_>) -> Outcome {
        Outcome::Forward
    }

    fn single_thread_only(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Binds its output slot to a copy of the input, then returns a fixed outcome.
#[derive(Debug)]
pub struct BoundOutput {
    pub outcome: Outcome,
}

impl BoundOutput {
    pub fn boxed(outcome: Outcome) -> Box<dyn Stage> {
        Box::new(Self { outcome })
    }
}

impl Stage for BoundOutput {
    fn kind(&self) -> &'static str {
        "BoundOutput"
    }

    fn process(&mut self, input: &mut dyn Event, output: &mut OutputSlot, _: &mut StageContext<'_>) -> Outcome {
        if let Some(event) = input.downcast_ref::<SampleEvent>() {
            output.get_or_insert::<SampleEvent>().samples = event.samples.clone();
        }
        self.outcome
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Declares fixed input/output tags and forwards its input.
#[derive(Debug)]
pub struct Tagged {
    pub input: &'static str,
    pub output: &'static str,
}

impl Tagged {
    pub fn boxed(input: &'static str, output: &'static str) -> Box<dyn Stage> {
        Box::new(Self { input, output })
    }

    pub fn wildcard() -> Box<dyn Stage> {
        Self::boxed(ANY_EVENT, ANY_EVENT)
    }
}

impl Stage for Tagged {
    fn kind(&self) -> &'static str {
        "Tagged"
    }

    fn input_type(&self) -> &'static str {
        self.input
    }

    fn output_type(&self) -> &'static str {
        self.output
    }

    fn process(&mut self, _: &mut dyn Event, _: &mut OutputSlot, _: &mut StageContext<'_>) -> Outcome {
        Outcome::Forward
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Built-in stages plus the test stages above.
pub fn test_factory() -> StageFactory {
    let mut factory = StageFactory::with_builtins();
    factory.register(IdRecorder::KIND, IdRecorder::from_config);
    factory.register(DropAll::KIND, DropAll::from_config);
    factory.register(Serial::KIND, Serial::from_config);
    factory
}

/// Context knowing the demo and test event types and stages.
pub fn test_context() -> EngineContext {
    let mut events = EventRegistry::with_defaults();
    events.register::<AEvent>();
    events.register::<BEvent>();
    EngineContext::new(TypeRegistry::with_defaults(), events, test_factory())
}
