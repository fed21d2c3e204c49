//! Builder for [`crate::CircuitBreaker`] configuration.

use resilient_exec_core::events::{FnListener, Listeners};
use resilient_exec_core::{ConfigError, TypedError};
use std::sync::Arc;
use std::time::Duration;

use crate::circuit::CircuitState;
use crate::events::CircuitBreakerEvent;

/// Effective configuration for one circuit breaker instance.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) reset_timeout: Duration,
    pub(crate) half_open_requests: u32,
    pub(crate) should_count_as_failure: Option<Arc<dyn Fn(&TypedError) -> bool + Send + Sync>>,
    pub(crate) name: String,
    pub(crate) event_listeners: Listeners<CircuitBreakerEvent>,
}

/// Builder for [`CircuitBreakerConfig`].
///
/// Defaults: `failure_threshold = 5`, `reset_timeout = 60s`,
/// `half_open_requests = 1`, unnamed.
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_requests: u32,
    should_count_as_failure: Option<Arc<dyn Fn(&TypedError) -> bool + Send + Sync>>,
    name: String,
    event_listeners: Listeners<CircuitBreakerEvent>,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_requests: 1,
            should_count_as_failure: None,
            name: "<unnamed>".to_string(),
            event_listeners: Listeners::new(),
        }
    }

    /// Consecutive failures (after filtering by `should_count_as_failure`)
    /// required to open the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// How long the circuit stays `open` before admitting a half-open probe.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// How many concurrent calls are admitted while `half-open`.
    pub fn half_open_requests(mut self, requests: u32) -> Self {
        self.half_open_requests = requests;
        self
    }

    /// Suppresses failure accounting for errors this predicate returns
    /// `false` for (e.g. `VALIDATION` errors shouldn't trip the breaker).
    pub fn should_count_as_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&TypedError) -> bool + Send + Sync + 'static,
    {
        self.should_count_as_failure = Some(Arc::new(f));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback fired on every state transition.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &CircuitBreakerEvent| {
            if let CircuitBreakerEvent::StateTransition { from, to, .. } = event {
                f(*from, *to);
            }
        }));
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }
        if self.half_open_requests == 0 {
            return Err(ConfigError::InvalidHalfOpenBudget);
        }

        Ok(CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: self.reset_timeout,
            half_open_requests: self.half_open_requests,
            should_count_as_failure: self.should_count_as_failure,
            name: self.name,
            event_listeners: self.event_listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_successfully() {
        let config = CircuitBreakerConfigBuilder::new().build().unwrap();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.half_open_requests, 1);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let result = CircuitBreakerConfigBuilder::new().failure_threshold(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_half_open_budget_is_rejected() {
        let result = CircuitBreakerConfigBuilder::new().half_open_requests(0).build();
        assert!(result.is_err());
    }
}
