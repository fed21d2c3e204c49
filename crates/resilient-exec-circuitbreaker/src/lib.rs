//! A consecutive-failure circuit breaker: closed, open, half-open.
//!
//! This is deliberately the simpler of the two breaker designs in common
//! use. It trips on an unbroken run of failures rather than a sliding
//! failure rate, and resets that count the instant a call succeeds.

pub mod circuit;
pub mod config;
pub mod events;

pub use circuit::{Circuit, CircuitOpen, CircuitState};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use events::CircuitBreakerEvent;

use std::sync::Arc;

use resilient_exec_core::TypedError;

/// A named, shareable circuit breaker.
///
/// Cloning a `CircuitBreaker` is cheap and shares the same underlying
/// state — clone it into every task that should share one breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    circuit: Arc<Circuit>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            circuit: Arc::new(Circuit::new(config)),
        }
    }

    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        self.circuit.name()
    }

    pub fn state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        self.circuit.try_acquire()
    }

    pub fn record_success(&self) {
        self.circuit.record_success();
    }

    pub fn record_failure(&self, error: &TypedError) {
        self.circuit.record_failure(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_a_working_breaker() {
        let breaker = CircuitBreaker::new(
            CircuitBreaker::builder()
                .failure_threshold(1)
                .name("orders")
                .build()
                .unwrap(),
        );
        assert_eq!(breaker.name(), "orders");
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap();
        breaker.record_failure(&TypedError::unknown("boom"));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn clone_shares_underlying_state() {
        let breaker = CircuitBreaker::new(CircuitBreaker::builder().failure_threshold(1).build().unwrap());
        let cloned = breaker.clone();
        breaker.record_failure(&TypedError::unknown("boom"));
        assert_eq!(cloned.state(), CircuitState::Open);
    }
}
