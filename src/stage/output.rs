//! Storage for a stage's own output event.
//!
//! A stage that transforms events in place never touches its slot. A stage
//! that produces a different event binds the slot, usually lazily on its
//! first `process` call, and returns [`Outcome::Emit`](super::Outcome::Emit).
//! The slot is owned by the stage's position in the chain so that the next
//! stage can borrow the event while the rest of the chain stays readable.

use crate::event::Event;

/// A stage's output event, if it has one.
#[derive(Debug, Default)]
pub struct OutputSlot {
    event: Option<Box<dyn Event>>,
}

impl OutputSlot {
    pub fn new() -> Self {
        Self { event: None }
    }

    /// Whether the stage has bound a distinct output event.
    pub fn is_bound(&self) -> bool {
        self.event.is_some()
    }

    /// Bind an arbitrary event, replacing the previous one.
    pub fn bind(&mut self, event: Box<dyn Event>) {
        self.event = Some(event);
    }

    /// The bound event as `T`, binding a fresh `T` first if the slot is
    /// empty or holds another type.
    pub fn get_or_insert<T: Event + Default>(&mut self) -> &mut T {
        let holds_t = self
            .event
            .as_deref()
            .is_some_and(|event| event.as_any().is::<T>());
        if !holds_t {
            self.event = Some(Box::new(T::default()));
        }
        match self.event.as_deref_mut().and_then(|event| event.downcast_mut::<T>()) {
            Some(event) => event,
            None => unreachable!("output slot was just bound to {}", std::any::type_name::<T>()),
        }
    }

    pub fn get(&self) -> Option<&dyn Event> {
        self.event.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut dyn Event> {
        self.event.as_deref_mut()
    }

    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.event.as_deref().and_then(|event| event.downcast_ref::<T>())
    }

    /// Type tag of the bound event.
    pub fn type_tag(&self) -> Option<&'static str> {
        self.event.as_deref().map(|event| event.type_tag())
    }

    pub fn clear(&mut self) {
        self.event = None;
    }
}
