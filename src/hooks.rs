//! Observability hooks and the structured logger seam.
//!
//! Every hook call is wrapped in [`std::panic::catch_unwind`]: a panicking
//! observer must never take down the call it is observing.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use resilient_exec_circuitbreaker::CircuitState;
use resilient_exec_core::TypedError;

use crate::outcome::Metrics;

/// Structured log sink. The default implementation emits through `tracing`
/// when the crate's `tracing` feature is enabled and is a no-op otherwise;
/// callers needing a different sink supply their own via
/// [`crate::ExecutorBuilder::logger`].
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// The `tracing`-backed default logger. With the `tracing` feature off,
/// every method is a no-op.
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::debug!("{message}");
        #[cfg(not(feature = "tracing"))]
        let _ = message;
    }

    fn info(&self, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::info!("{message}");
        #[cfg(not(feature = "tracing"))]
        let _ = message;
    }

    fn warn(&self, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::warn!("{message}");
        #[cfg(not(feature = "tracing"))]
        let _ = message;
    }

    fn error(&self, message: &str) {
        #[cfg(feature = "tracing")]
        tracing::error!("{message}");
        #[cfg(not(feature = "tracing"))]
        let _ = message;
    }
}

/// The type-independent observability hooks recognized by
/// `ExecutorConfig`/`CallOptions`. `on_success` is the one exception — it
/// sees the task's output type `T` and so is carried on `CallOptions<T>`
/// instead (see [`crate::executor::CallOptions`]).
/// Each field is invoked through [`Hooks::guard`] so a panicking closure can
/// never affect the call it observes.
#[derive(Clone, Default)]
pub struct Hooks {
    on_retry: Option<Arc<dyn Fn(u32, &TypedError, Duration) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&TypedError, &Metrics) + Send + Sync>>,
    on_finally: Option<Arc<dyn Fn(&Metrics) + Send + Sync>>,
    on_abort: Option<Arc<dyn Fn(&TypedError) + Send + Sync>>,
    on_circuit_state_change: Option<Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>>,
}

impl Hooks {
    pub fn guard<F: FnOnce()>(f: F) {
        let _ = std::panic::catch_unwind(AssertUnwindSafe(f));
    }

    pub fn on_retry(mut self, f: impl Fn(u32, &TypedError, Duration) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&TypedError, &Metrics) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_finally(mut self, f: impl Fn(&Metrics) + Send + Sync + 'static) -> Self {
        self.on_finally = Some(Arc::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl Fn(&TypedError) + Send + Sync + 'static) -> Self {
        self.on_abort = Some(Arc::new(f));
        self
    }

    pub fn on_circuit_state_change(mut self, f: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static) -> Self {
        self.on_circuit_state_change = Some(Arc::new(f));
        self
    }

    pub(crate) fn fire_retry(&self, attempt: u32, error: &TypedError, delay: Duration) {
        if let Some(f) = &self.on_retry {
            Hooks::guard(|| f(attempt, error, delay));
        }
    }

    pub(crate) fn fire_error(&self, error: &TypedError, metrics: &Metrics) {
        if let Some(f) = &self.on_error {
            Hooks::guard(|| f(error, metrics));
        }
    }

    pub(crate) fn fire_finally(&self, metrics: &Metrics) {
        if let Some(f) = &self.on_finally {
            Hooks::guard(|| f(metrics));
        }
    }

    pub(crate) fn fire_abort(&self, error: &TypedError) {
        if let Some(f) = &self.on_abort {
            Hooks::guard(|| f(error));
        }
    }

    pub(crate) fn fire_circuit_state_change(&self, from: CircuitState, to: CircuitState) {
        if let Some(f) = &self.on_circuit_state_change {
            Hooks::guard(|| f(from, to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn guard_swallows_panics() {
        let mut ran_after = false;
        Hooks::guard(|| panic!("boom"));
        ran_after = true;
        assert!(ran_after);
    }

    #[test]
    fn fire_finally_invokes_registered_hook_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let hooks = Hooks::default().on_finally(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        hooks.fire_finally(&Metrics::empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_hook_does_not_poison_subsequent_calls() {
        let hooks = Hooks::default().on_abort(|_| panic!("boom"));
        hooks.fire_abort(&TypedError::aborted("x"));
        hooks.fire_abort(&TypedError::aborted("x"));
    }
}
