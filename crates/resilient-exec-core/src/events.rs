//! Event system shared by the executor and circuit breaker crates.
//!
//! Listeners are boxed trait objects, `emit` catches panics so one
//! misbehaving listener can't take down the others, and `tracing`/`metrics`
//! features add observability around a panic without changing default
//! behavior.

#[cfg(feature = "tracing")]
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Trait for events emitted by resilient-exec components.
pub trait Event: Send + Sync + fmt::Debug {
    /// A stable, short name for this event kind (e.g. `"retry"`, `"state_transition"`).
    fn event_type(&self) -> &'static str;

    fn timestamp(&self) -> Instant;
}

/// Trait for listening to events of a given type.
pub trait Listener<E: Event>: Send + Sync {
    fn on_event(&self, event: &E);
}

type BoxedListener<E> = Arc<dyn Listener<E>>;

/// A collection of event listeners, invoked in registration order.
#[derive(Clone)]
pub struct Listeners<E: Event> {
    listeners: Vec<BoxedListener<E>>,
}

impl<E: Event> Listeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn add<L>(&mut self, listener: L)
    where
        L: Listener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to every registered listener.
    ///
    /// Hook errors must never affect control flow: a panicking listener is
    /// caught via [`std::panic::catch_unwind`] and the remaining listeners
    /// still run.
    pub fn emit(&self, event: &E) {
        for (index, listener) in self.listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                log_listener_panic(index, event, _panic_payload.as_ref());

                #[cfg(feature = "metrics")]
                record_listener_panic_metric(event);

                #[cfg(not(feature = "tracing"))]
                let _ = index;

                #[cfg(not(any(feature = "tracing", feature = "metrics")))]
                let _ = _panic_payload;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E: Event> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A closure-backed [`Listener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _marker: std::marker::PhantomData<E>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, F> Listener<E> for FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

#[cfg(feature = "tracing")]
fn log_listener_panic<E: Event>(index: usize, event: &E, panic_payload: &(dyn Any + Send)) {
    let panic_message = panic_payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    tracing::warn!(
        listener_index = index,
        event_type = event.event_type(),
        panic_message = %panic_message,
        "resilient-exec event listener panicked"
    );
}

#[cfg(feature = "metrics")]
fn record_listener_panic_metric<E: Event>(event: &E) {
    metrics::counter!(
        "resilient_exec_event_listener_panics_total",
        "event_type" => event.event_type().to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        timestamp: Instant,
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            "test"
        }

        fn timestamp(&self) -> Instant {
            self.timestamp
        }
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut listeners = Listeners::new();
        let o1 = Arc::clone(&order);
        listeners.add(FnListener::new(move |_: &TestEvent| o1.lock().unwrap().push(1)));
        let o2 = Arc::clone(&order);
        listeners.add(FnListener::new(move |_: &TestEvent| o2.lock().unwrap().push(2)));

        listeners.emit(&TestEvent {
            timestamp: Instant::now(),
        });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut listeners = Listeners::new();
        listeners.add(FnListener::new(|_: &TestEvent| panic!("boom")));
        let c = Arc::clone(&counter);
        listeners.add(FnListener::new(move |_: &TestEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&TestEvent {
            timestamp: Instant::now(),
        });

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
