//! The breaker state machine: closed, open, half-open.
//!
//! This is the consecutive-failure variant: the circuit counts an unbroken
//! run of failures and resets that count on any success. It does not track
//! a sliding failure rate.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use resilient_exec_core::TypedError;

use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;

/// The three states a circuit breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls are admitted; failures accumulate toward `failure_threshold`.
    Closed = 0,
    /// Calls are rejected until `reset_timeout` elapses.
    Open = 1,
    /// A limited number of probe calls are admitted to test recovery.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit state byte"),
        }
    }
}

/// Rejection returned by [`Circuit::try_acquire`] when the breaker will not
/// admit the call.
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpen;

/// The mutable breaker state for one named circuit.
///
/// The current state is kept in an `AtomicU8` so callers can read
/// [`Circuit::state`] without taking a lock; transition bookkeeping (the
/// consecutive-failure counter, half-open probe budget, and the open-until
/// deadline) lives behind a `Mutex` since transitions must be atomic as a
/// group.
pub struct Circuit {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    opened_at_millis: AtomicU64,
    inner: Mutex<Inner>,
    half_open_in_flight: AtomicU32,
}

struct Inner {
    consecutive_failures: u32,
    half_open_successes: u32,
    epoch: Instant,
}

impl Circuit {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            opened_at_millis: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                half_open_successes: 0,
                epoch: Instant::now(),
            }),
            half_open_in_flight: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Lock-free read of the current state. Note this does not perform the
    /// open-to-half-open transition check — that only happens inside
    /// [`Circuit::try_acquire`], since it requires admitting a call.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempts to admit one call. On success, the caller must report the
    /// outcome via [`Circuit::record_success`] or
    /// [`Circuit::record_failure`].
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        match self.state() {
            CircuitState::Closed => {
                self.emit(CircuitBreakerEvent::CallPermitted {
                    name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    state: CircuitState::Closed,
                });
                Ok(())
            }
            CircuitState::Open => {
                if self.reset_timeout_elapsed() {
                    self.transition_to_half_open();
                    self.admit_half_open_probe()
                } else {
                    self.emit(CircuitBreakerEvent::CallRejected {
                        name: self.config.name.clone(),
                        timestamp: Instant::now(),
                        state: CircuitState::Open,
                    });
                    Err(CircuitOpen)
                }
            }
            CircuitState::HalfOpen => self.admit_half_open_probe(),
        }
    }

    fn admit_half_open_probe(&self) -> Result<(), CircuitOpen> {
        let budget = self.config.half_open_requests;
        let reserved = self
            .half_open_in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < budget {
                    Some(current + 1)
                } else {
                    None
                }
            });
        match reserved {
            Ok(_) => {
                self.emit(CircuitBreakerEvent::CallPermitted {
                    name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    state: CircuitState::HalfOpen,
                });
                Ok(())
            }
            Err(_) => {
                self.emit(CircuitBreakerEvent::CallRejected {
                    name: self.config.name.clone(),
                    timestamp: Instant::now(),
                    state: CircuitState::HalfOpen,
                });
                Err(CircuitOpen)
            }
        }
    }

    /// Records a successful call governed by this breaker.
    pub fn record_success(&self) {
        let state = self.state();
        self.emit(CircuitBreakerEvent::SuccessRecorded {
            name: self.config.name.clone(),
            timestamp: Instant::now(),
            state,
        });

        match state {
            CircuitState::Closed => {
                let mut inner = self.inner.lock().expect("circuit mutex poisoned");
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                self.close();
            }
            CircuitState::Open => {
                // A racing call was admitted as the circuit flipped open; ignore.
            }
        }
    }

    /// Records a failed call. `error` lets [`CircuitBreakerConfig::should_count_as_failure`]
    /// decide whether it counts toward the breaker at all.
    pub fn record_failure(&self, error: &TypedError) {
        if let Some(predicate) = &self.config.should_count_as_failure {
            if !predicate(error) {
                return;
            }
        }

        let state = self.state();
        self.emit(CircuitBreakerEvent::FailureRecorded {
            name: self.config.name.clone(),
            timestamp: Instant::now(),
            state,
        });

        match state {
            CircuitState::Closed => {
                let breached = {
                    let mut inner = self.inner.lock().expect("circuit mutex poisoned");
                    inner.consecutive_failures += 1;
                    inner.consecutive_failures >= self.config.failure_threshold
                };
                if breached {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                self.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn reset_timeout_elapsed(&self) -> bool {
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        let inner = self.inner.lock().expect("circuit mutex poisoned");
        let elapsed = inner.epoch.elapsed().as_millis() as u64;
        elapsed.saturating_sub(opened_at) >= self.config.reset_timeout.as_millis() as u64
    }

    fn open(&self) {
        let from = self.state();
        if from == CircuitState::Open {
            return;
        }
        let elapsed_millis = {
            let mut inner = self.inner.lock().expect("circuit mutex poisoned");
            inner.consecutive_failures = 0;
            inner.half_open_successes = 0;
            inner.epoch.elapsed().as_millis() as u64
        };
        self.opened_at_millis.store(elapsed_millis, Ordering::Release);
        self.half_open_in_flight.store(0, Ordering::Release);
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.emit(CircuitBreakerEvent::StateTransition {
            name: self.config.name.clone(),
            timestamp: Instant::now(),
            from,
            to: CircuitState::Open,
        });
    }

    fn transition_to_half_open(&self) {
        let prior = self.state.compare_exchange(
            CircuitState::Open as u8,
            CircuitState::HalfOpen as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if prior.is_ok() {
            self.half_open_in_flight.store(0, Ordering::Release);
            self.emit(CircuitBreakerEvent::StateTransition {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                from: CircuitState::Open,
                to: CircuitState::HalfOpen,
            });
        }
    }

    fn close(&self) {
        let from = self.state();
        {
            let mut inner = self.inner.lock().expect("circuit mutex poisoned");
            inner.consecutive_failures = 0;
            inner.half_open_successes = 0;
        }
        self.half_open_in_flight.store(0, Ordering::Release);
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        if from != CircuitState::Closed {
            self.emit(CircuitBreakerEvent::StateTransition {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                from,
                to: CircuitState::Closed,
            });
        }
    }

    fn emit(&self, event: CircuitBreakerEvent) {
        #[cfg(feature = "tracing")]
        match &event {
            CircuitBreakerEvent::StateTransition { name, from, to, .. } => {
                tracing::info!(circuit = name.as_str(), ?from, ?to, "circuit breaker state transition");
            }
            CircuitBreakerEvent::CallRejected { name, .. } => {
                tracing::debug!(circuit = name.as_str(), "circuit breaker rejected call");
            }
            _ => {}
        }
        #[cfg(feature = "metrics")]
        match &event {
            CircuitBreakerEvent::CallRejected { name, .. } => {
                metrics::counter!("resilient_exec_circuit_rejected_total", "name" => name.clone())
                    .increment(1);
            }
            CircuitBreakerEvent::StateTransition { name, to, .. } => {
                metrics::gauge!("resilient_exec_circuit_state", "name" => name.clone())
                    .set(*to as u8 as f64);
            }
            _ => {}
        }
        self.config.event_listeners.emit(&event);
    }

    #[cfg(test)]
    pub(crate) fn force_open_for_test(&self) {
        self.open();
    }

    #[cfg(test)]
    pub(crate) fn age_past_reset_timeout_for_test(&self) {
        let extra = self.config.reset_timeout + Duration::from_millis(50);
        let mut inner = self.inner.lock().expect("circuit mutex poisoned");
        inner.epoch -= extra;
    }
}
