//! Type tag → constructor map for concrete events.

use crate::event::{Event, PulseEvent, SampleEvent, ANY_EVENT};
use std::collections::HashMap;

fn construct<T: Event + Default>() -> Box<dyn Event> {
    Box::new(T::default())
}

/// Known concrete event types.
///
/// Chain validation rejects stages that declare a tag missing from here, and
/// a worker running without a calibration run assembles its output event
/// through [`EventRegistry::create`].
#[derive(Debug, Clone)]
pub struct EventRegistry {
    constructors: HashMap<&'static str, fn() -> Box<dyn Event>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the demo event types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<SampleEvent>();
        registry.register::<PulseEvent>();
        registry
    }

    /// Register `T` under its own type tag.
    pub fn register<T: Event + Default>(&mut self) {
        let tag = T::default().type_tag();
        self.constructors.insert(tag, construct::<T>);
    }

    /// Whether `tag` names a known event type. The wildcard is always known.
    pub fn contains(&self, tag: &str) -> bool {
        tag == ANY_EVENT || self.constructors.contains_key(tag)
    }

    /// Fresh, initialized instance of `tag`. `None` for unknown tags and for
    /// the wildcard, which has no concrete type.
    pub fn create(&self, tag: &str) -> Option<Box<dyn Event>> {
        self.constructors.get(tag).map(|ctor| ctor())
    }

    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.constructors.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
