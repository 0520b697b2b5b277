//! Event system shared by every component in the ingestion engine.
//!
//! Every resilience concern (cache, rate limiter, circuit breaker, retry,
//! token refresh) emits a typed event through this system rather than
//! logging directly, so that a caller can attach its own observer without
//! the emitting component knowing anything about tracing, metrics, or
//! whatever the CLI/web layers eventually do with the events.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait implemented by every event type emitted inside the engine.
pub trait EngineEvent: Send + Sync + fmt::Debug {
    /// Short machine-readable event type, e.g. `"cache_hit"`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the component instance that emitted the event (an operation
    /// name, a service name, or a cache name).
    fn source(&self) -> &str;
}

/// A listener that observes events of a single type.
pub trait EventListener<E: EngineEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn EventListener<E>>;

/// A collection of listeners for a single event type.
///
/// Listener panics are caught at the emit site so one broken observer never
/// takes down the others or the caller's request.
#[derive(Clone)]
pub struct EventListeners<E: EngineEvent> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: EngineEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener, catching panics so a
    /// single misbehaving observer cannot abort the caller.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    source = event.source(),
                    event_type = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: EngineEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener built from a plain closure.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _phantom: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: EngineEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        name: String,
        at: Instant,
    }

    impl EngineEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }
        fn timestamp(&self) -> Instant {
            self.at
        }
        fn source(&self) -> &str {
            &self.name
        }
    }

    #[test]
    fn emits_to_all_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TestEvent {
            name: "svc".into(),
            at: Instant::now(),
        };
        listeners.emit(&event);
        listeners.emit(&event);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);

        let mut listeners = EventListeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| panic!("boom")));
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));

        let event = TestEvent {
            name: "svc".into(),
            at: Instant::now(),
        };
        listeners.emit(&event);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
