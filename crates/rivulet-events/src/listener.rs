//! Listener contract and registration handles.

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::payloads::EventEnvelope;
use crate::topics::EventFilter;

/// Failure reported by a listener; logged and swallowed at the bus boundary.
pub type ListenerError = Box<dyn Error + Send + Sync>;

/// Identifier assigned to each registration.
pub type RegistrationId = u64;

/// Consumer of dispatched events.
///
/// Each registered listener gets its own delivery queue, so a slow implementation only
/// delays itself.
pub trait EventListener: Send + Sync + 'static {
    /// Handle a single event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the bus and does not affect other listeners.
    fn on_event(&self, envelope: &EventEnvelope) -> Result<(), ListenerError>;

    /// Event kinds this listener wants delivered.
    fn filter(&self) -> EventFilter {
        EventFilter::All
    }
}

impl<F> EventListener for F
where
    F: Fn(&EventEnvelope) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn on_event(&self, envelope: &EventEnvelope) -> Result<(), ListenerError> {
        self(envelope)
    }
}

/// Adapter restricting an existing listener to a subset of event kinds.
pub struct Filtered<L> {
    filter: EventFilter,
    inner: L,
}

impl<L: EventListener> Filtered<L> {
    /// Wrap `inner` so it only receives events accepted by `filter`.
    pub const fn new(filter: EventFilter, inner: L) -> Self {
        Self { filter, inner }
    }
}

impl<L: EventListener> EventListener for Filtered<L> {
    fn on_event(&self, envelope: &EventEnvelope) -> Result<(), ListenerError> {
        self.inner.on_event(envelope)
    }

    fn filter(&self) -> EventFilter {
        self.filter.clone()
    }
}

/// Disposal token returned by [`crate::EventBus::register`].
///
/// Dropping the handle does not unregister; pass it to [`crate::EventBus::unregister`].
#[derive(Debug, Clone)]
pub struct RegistrationHandle {
    id: RegistrationId,
    active: Arc<AtomicBool>,
}

impl RegistrationHandle {
    pub(crate) const fn new(id: RegistrationId, active: Arc<AtomicBool>) -> Self {
        Self { id, active }
    }

    /// Identifier of the registration.
    #[must_use]
    pub const fn id(&self) -> RegistrationId {
        self.id
    }

    /// Whether the registration still receives events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}
