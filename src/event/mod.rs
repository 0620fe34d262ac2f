//! Event capability set.
//!
//! The engine never looks inside an event's payload. It only needs the
//! header fields every event carries (id, sub-id, timestamp, sub-event tag,
//! run origin, sub-run origin), the ability to reset and clone an event, and
//! a type tag used for chain compatibility checks.
//!
//! Concrete event types live next to the stages that use them; two demo
//! types ([`SampleEvent`], [`PulseEvent`]) ship with the built-in stages.

pub mod registry;
pub mod sample;

pub use registry::EventRegistry;
pub use sample::{Pulse, PulseEvent, SampleEvent};

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Wildcard type tag: "accepts/produces any event".
pub const ANY_EVENT: &str = "Event";

/// Whether two declared type tags can be connected.
#[inline]
pub fn tags_compatible(output: &str, input: &str) -> bool {
    output == input || output == ANY_EVENT || input == ANY_EVENT
}

/// Event-scope fields shared by every event and mirrored into each table row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub id: i32,
    pub sub_id: i32,
    /// Seconds since the epoch of the run.
    pub timestamp: f64,
    pub sub_event_tag: String,
    pub run_origin: i32,
    pub sub_run_origin: i32,
}

/// A unit of detector data flowing through a chain.
pub trait Event: Send + fmt::Debug + 'static {
    /// Name of the concrete event type, e.g. `"SampleEvent"`.
    fn type_tag(&self) -> &'static str;

    fn header(&self) -> &EventHeader;

    fn header_mut(&mut self) -> &mut EventHeader;

    /// Reset header and payload to an empty event.
    fn initialize(&mut self);

    fn clone_event(&self) -> Box<dyn Event>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn id(&self) -> i32 {
        self.header().id
    }

    fn set_id(&mut self, id: i32) {
        self.header_mut().id = id;
    }

    fn sub_id(&self) -> i32 {
        self.header().sub_id
    }

    fn set_sub_id(&mut self, sub_id: i32) {
        self.header_mut().sub_id = sub_id;
    }

    fn timestamp(&self) -> f64 {
        self.header().timestamp
    }

    fn set_timestamp(&mut self, timestamp: f64) {
        self.header_mut().timestamp = timestamp;
    }

    fn sub_event_tag(&self) -> &str {
        &self.header().sub_event_tag
    }

    fn set_sub_event_tag(&mut self, tag: &str) {
        let header = self.header_mut();
        header.sub_event_tag.clear();
        header.sub_event_tag.push_str(tag);
    }

    fn run_origin(&self) -> i32 {
        self.header().run_origin
    }

    fn set_run_origin(&mut self, run: i32) {
        self.header_mut().run_origin = run;
    }

    fn sub_run_origin(&self) -> i32 {
        self.header().sub_run_origin
    }

    fn set_sub_run_origin(&mut self, sub_run: i32) {
        self.header_mut().sub_run_origin = sub_run;
    }
}

impl dyn Event {
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Event>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Copy the event-scope fields of `other` into this event.
    pub fn copy_header_from(&mut self, other: &dyn Event) {
        self.header_mut().clone_from(other.header());
    }
}
