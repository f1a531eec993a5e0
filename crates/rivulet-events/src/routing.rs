//! Listener fan-out.
//!
//! # Design
//! - Registrations live in a copy-on-write vector; dispatch iterates a cloned snapshot, so
//!   listeners may register or unregister from inside their own callback.
//! - Every registration owns an unbounded FIFO queue and dispatch only enqueues. The event
//!   source never waits on a consumer and arrival order is preserved per listener.
//! - Callbacks run on the blocking pool, one in flight per registration.
//! - Listener errors and panics are caught at delivery, logged, and counted.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::error::{EventBusError, EventBusResult};
use crate::listener::{EventListener, RegistrationHandle, RegistrationId};
use crate::payloads::{Event, EventEnvelope, EventId};
use crate::topics::EventFilter;

type Snapshot = Arc<Vec<Arc<Registration>>>;

struct Registration {
    handle: RegistrationHandle,
    filter: EventFilter,
    queue: mpsc::UnboundedSender<EventEnvelope>,
}

struct BusInner {
    registrations: RwLock<Snapshot>,
    next_event_id: AtomicU64,
    next_registration_id: AtomicU64,
    listener_failures: Arc<AtomicU64>,
}

/// Process-wide multicast dispatcher shared by cloning.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Construct an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: RwLock::new(Arc::new(Vec::new())),
                next_event_id: AtomicU64::new(1),
                next_registration_id: AtomicU64::new(1),
                listener_failures: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Register a listener.
    ///
    /// Callbacks run one at a time on the blocking pool of the current runtime, so a
    /// listener that blocks holds neither a runtime worker nor the other listeners.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::NoRuntime`] when called outside a Tokio runtime.
    pub fn register<L: EventListener>(&self, listener: L) -> EventBusResult<RegistrationHandle> {
        let runtime = Handle::try_current().map_err(|_| EventBusError::NoRuntime {
            registration: "listener",
        })?;
        let (queue, mut rx) = mpsc::unbounded_channel();
        let handle = self.insert(listener.filter(), queue);
        let active = handle.clone();
        let failures = Arc::clone(&self.inner.listener_failures);
        let listener = Arc::new(listener);
        runtime.spawn(async move {
            let registration = active.id();
            while let Some(envelope) = rx.recv().await {
                if !active.is_active() {
                    break;
                }
                let listener = Arc::clone(&listener);
                let failures = Arc::clone(&failures);
                let delivery = task::spawn_blocking(move || {
                    deliver(listener.as_ref(), &envelope, registration, &failures);
                });
                if let Err(err) = delivery.await {
                    warn!(registration, error = %err, "listener delivery aborted");
                    break;
                }
            }
            debug!(registration, "listener delivery finished");
        });
        Ok(handle)
    }

    /// Subscribe through a stream instead of a callback. Dropping the stream unregisters it.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (queue, rx) = mpsc::unbounded_channel();
        let handle = self.insert(filter, queue);
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
            handle,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration. Returns `false` when it was already removed.
    ///
    /// Events queued for the listener but not yet delivered are discarded.
    pub fn unregister(&self, handle: &RegistrationHandle) -> bool {
        if !handle.deactivate() {
            return false;
        }
        remove_registration(&self.inner, handle.id());
        true
    }

    /// Deliver an event to every matching registration and return its id.
    pub fn dispatch(&self, event: Event) -> EventId {
        let id = self.inner.next_event_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        let snapshot = self.snapshot();
        let mut saw_closed = false;
        for registration in snapshot.iter() {
            if !registration.handle.is_active() || !registration.filter.matches(&envelope.event)
            {
                continue;
            }
            if registration.queue.send(envelope.clone()).is_err() {
                saw_closed = true;
            }
        }
        if saw_closed {
            self.prune_closed();
        }
        id
    }

    /// Number of live registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Total listener failures swallowed since the bus was created.
    #[must_use]
    pub fn listener_failures(&self) -> u64 {
        self.inner.listener_failures.load(Ordering::Relaxed)
    }

    fn insert(
        &self,
        filter: EventFilter,
        queue: mpsc::UnboundedSender<EventEnvelope>,
    ) -> RegistrationHandle {
        let id = self
            .inner
            .next_registration_id
            .fetch_add(1, Ordering::Relaxed);
        let handle = RegistrationHandle::new(id, Arc::new(AtomicBool::new(true)));
        let registration = Arc::new(Registration {
            handle: handle.clone(),
            filter,
            queue,
        });
        let mut guard = self
            .inner
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(registration);
        *guard = Arc::new(next);
        handle
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(
            &self
                .inner
                .registrations
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn prune_closed(&self) {
        let mut guard = self
            .inner
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next: Vec<_> = guard
            .iter()
            .filter(|registration| !registration.queue.is_closed())
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_registration(inner: &BusInner, id: RegistrationId) {
    let mut guard = inner
        .registrations
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if guard.iter().any(|registration| registration.handle.id() == id) {
        let next: Vec<_> = guard
            .iter()
            .filter(|registration| registration.handle.id() != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }
}

fn deliver<L: EventListener>(
    listener: &L,
    envelope: &EventEnvelope,
    registration: RegistrationId,
    failures: &AtomicU64,
) {
    match catch_unwind(AssertUnwindSafe(|| listener.on_event(envelope))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                registration,
                event_id = envelope.id,
                event_kind = envelope.event.kind(),
                error = %err,
                "event listener failed"
            );
        }
        Err(payload) => {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                registration,
                event_id = envelope.id,
                event_kind = envelope.event.kind(),
                panic = %panic_message(payload.as_ref()),
                "event listener panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Stream of events for a single subscription.
pub struct EventStream {
    inner: UnboundedReceiverStream<EventEnvelope>,
    handle: RegistrationHandle,
    bus: Weak<BusInner>,
}

impl EventStream {
    /// Registration backing this stream.
    #[must_use]
    pub const fn handle(&self) -> &RegistrationHandle {
        &self.handle
    }
}

impl Stream for EventStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.handle.deactivate()
            && let Some(inner) = self.bus.upgrade()
        {
            remove_registration(&inner, self.handle.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerError;
    use crate::payloads::{TorrentId, TorrentStateCode};
    use crate::topics::EventKind;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_stream::StreamExt;

    const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

    fn collector() -> (
        impl Fn(&EventEnvelope) -> Result<(), ListenerError> + Send + Sync + 'static,
        mpsc::UnboundedReceiver<EventEnvelope>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = move |envelope: &EventEnvelope| -> Result<(), ListenerError> {
            let _ = tx.send(envelope.clone());
            Ok(())
        };
        (listener, rx)
    }

    async fn next_with_timeout(
        rx: &mut mpsc::UnboundedReceiver<EventEnvelope>,
    ) -> Option<EventEnvelope> {
        timeout(DELIVERY_TIMEOUT, rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn dispatch_reaches_every_listener_once() {
        let bus = EventBus::new();
        let (first, mut first_rx) = collector();
        let (second, mut second_rx) = collector();
        bus.register(first).expect("register first");
        bus.register(second).expect("register second");

        let id = bus.dispatch(Event::SessionStarted);

        assert_eq!(next_with_timeout(&mut first_rx).await.map(|e| e.id), Some(id));
        assert_eq!(next_with_timeout(&mut second_rx).await.map(|e| e.id), Some(id));
        sleep(Duration::from_millis(20)).await;
        assert!(first_rx.try_recv().is_err(), "no duplicate delivery");
    }

    #[tokio::test]
    async fn failing_listeners_do_not_block_delivery() {
        let bus = EventBus::new();
        bus.register(|_: &EventEnvelope| -> Result<(), ListenerError> {
            Err("listener rejected event".into())
        })
        .expect("register failing");
        bus.register(|_: &EventEnvelope| -> Result<(), ListenerError> {
            panic!("listener exploded")
        })
        .expect("register panicking");
        let (healthy, mut rx) = collector();
        bus.register(healthy).expect("register healthy");

        bus.dispatch(Event::SessionStopped);
        bus.dispatch(Event::SessionStarted);

        assert!(next_with_timeout(&mut rx).await.is_some());
        assert!(next_with_timeout(&mut rx).await.is_some());
        timeout(DELIVERY_TIMEOUT, async {
            while bus.listener_failures() < 4 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("failures counted");
    }

    #[tokio::test]
    async fn unregistered_listener_receives_nothing() {
        let bus = EventBus::new();
        let (listener, mut rx) = collector();
        let handle = bus.register(listener).expect("register");
        assert!(bus.unregister(&handle));
        assert!(!bus.unregister(&handle), "second unregister is a no-op");

        bus.dispatch(Event::SessionStarted);

        assert!(
            timeout(Duration::from_millis(50), rx.recv())
                .await
                .ok()
                .flatten()
                .is_none()
        );
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn listener_may_unregister_itself_from_callback() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<RegistrationHandle>>> = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = {
            let bus = bus.clone();
            let slot = Arc::clone(&slot);
            move |envelope: &EventEnvelope| -> Result<(), ListenerError> {
                let _ = tx.send(envelope.id);
                if let Some(handle) = slot.lock().expect("slot").as_ref() {
                    bus.unregister(handle);
                }
                Ok(())
            }
        };
        let handle = bus.register(listener).expect("register");
        *slot.lock().expect("slot") = Some(handle);

        let first = bus.dispatch(Event::SessionStarted);
        assert_eq!(
            timeout(DELIVERY_TIMEOUT, rx.recv()).await.ok().flatten(),
            Some(first)
        );
        bus.dispatch(Event::SessionStopped);
        assert!(
            timeout(Duration::from_millis(50), rx.recv())
                .await
                .ok()
                .flatten()
                .is_none()
        );
    }

    #[tokio::test]
    async fn slow_listener_does_not_delay_others() {
        let bus = EventBus::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        bus.register(move |_: &EventEnvelope| -> Result<(), ListenerError> {
            let _ = release_rx
                .lock()
                .expect("release lock")
                .recv_timeout(Duration::from_secs(2));
            Ok(())
        })
        .expect("register slow");
        let (fast, mut rx) = collector();
        bus.register(fast).expect("register fast");

        for _ in 0..10 {
            bus.dispatch(Event::SessionStarted);
        }
        for _ in 0..10 {
            assert!(next_with_timeout(&mut rx).await.is_some());
        }
        let _ = release_tx.send(());
    }

    #[tokio::test]
    async fn sleeping_listener_leaves_the_runtime_free() {
        let bus = EventBus::new();
        bus.register(|_: &EventEnvelope| -> Result<(), ListenerError> {
            std::thread::sleep(Duration::from_millis(800));
            Ok(())
        })
        .expect("register sleeper");
        let (fast, mut rx) = collector();
        bus.register(fast).expect("register fast");

        let started = std::time::Instant::now();
        bus.dispatch(Event::SessionStarted);
        let delivered = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(delivered, Ok(Some(_))));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn same_torrent_events_arrive_in_dispatch_order() {
        let bus = EventBus::new();
        let (listener, mut rx) = collector();
        bus.register(listener).expect("register");
        let torrent_id = TorrentId::new("ab");

        let mut expected = Vec::new();
        for _ in 0..100 {
            expected.push(bus.dispatch(Event::TorrentStateChanged {
                torrent_id: torrent_id.clone(),
                previous: TorrentStateCode::Downloading,
                current: TorrentStateCode::Paused,
            }));
        }
        let mut received = Vec::new();
        for _ in 0..100 {
            received.push(next_with_timeout(&mut rx).await.expect("event").id);
        }
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn stream_subscription_filters_and_unregisters_on_drop() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(EventFilter::only([EventKind::SessionError]));
        bus.dispatch(Event::SessionStarted);
        let id = bus.dispatch(Event::SessionError {
            message: "boom".into(),
        });

        let envelope = timeout(DELIVERY_TIMEOUT, stream.next())
            .await
            .expect("stream item")
            .expect("open stream");
        assert_eq!(envelope.id, id);
        assert_eq!(bus.listener_count(), 1);

        drop(stream);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn register_outside_runtime_fails() {
        let bus = EventBus::new();
        let result = bus.register(|_: &EventEnvelope| -> Result<(), ListenerError> { Ok(()) });
        assert!(matches!(result, Err(EventBusError::NoRuntime { .. })));
    }
}
