//! Events emitted by [`crate::CircuitBreaker`] for observability.

use resilient_exec_core::events::Event;
use std::time::Instant;

use crate::circuit::CircuitState;

/// An event emitted by a circuit breaker instance.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    StateTransition {
        name: String,
        timestamp: Instant,
        from: CircuitState,
        to: CircuitState,
    },
    CallPermitted {
        name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    CallRejected {
        name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    SuccessRecorded {
        name: String,
        timestamp: Instant,
        state: CircuitState,
    },
    FailureRecorded {
        name: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl Event for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }
}
