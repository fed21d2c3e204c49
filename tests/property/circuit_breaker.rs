//! Property tests for the consecutive-failure circuit breaker.
//!
//! Invariants tested:
//! - The circuit rejects exactly the (threshold+1)-th consecutive failure
//!   and every call after it, until the reset timeout elapses.
//! - Any single success while closed resets the consecutive-failure count.
//! - After the reset timeout, exactly one half-open probe is admitted per
//!   `half_open_requests` budget.

use proptest::prelude::*;
use resilient_exec::{CircuitBreaker, CircuitState};
use resilient_exec_core::TypedError;
use std::time::Duration;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Property: the breaker opens exactly at `failure_threshold` consecutive
    /// failures, never earlier.
    #[test]
    fn opens_at_exactly_the_threshold(threshold in 1u32..=10) {
        let breaker = CircuitBreaker::new(
            CircuitBreaker::builder()
                .failure_threshold(threshold)
                .name("prop")
                .build()
                .unwrap(),
        );

        for _ in 0..(threshold - 1) {
            breaker.try_acquire().unwrap();
            breaker.record_failure(&TypedError::unknown("boom"));
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }

        breaker.try_acquire().unwrap();
        breaker.record_failure(&TypedError::unknown("boom"));
        prop_assert_eq!(breaker.state(), CircuitState::Open);
        prop_assert!(breaker.try_acquire().is_err());
    }

    /// Property: a success anywhere in a run of failures resets the
    /// consecutive count, so the circuit never opens purely from the
    /// failures that preceded the success.
    #[test]
    fn a_success_resets_the_consecutive_count(
        threshold in 2u32..=8,
        failures_before_success in 0u32..=6,
    ) {
        let breaker = CircuitBreaker::new(
            CircuitBreaker::builder()
                .failure_threshold(threshold)
                .name("prop")
                .build()
                .unwrap(),
        );

        let capped = failures_before_success.min(threshold - 1);
        for _ in 0..capped {
            breaker.try_acquire().unwrap();
            breaker.record_failure(&TypedError::unknown("boom"));
        }
        breaker.try_acquire().unwrap();
        breaker.record_success();
        prop_assert_eq!(breaker.state(), CircuitState::Closed);

        // One more failure than threshold-1 is needed from here — the prior
        // run must not have left any residual count behind.
        for _ in 0..(threshold - 1) {
            breaker.try_acquire().unwrap();
            breaker.record_failure(&TypedError::unknown("boom"));
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
        }
    }

    /// Property: after `reset_timeout` elapses, the breaker admits exactly
    /// `half_open_requests` probes and rejects everything beyond that budget
    /// until one resolves.
    #[test]
    fn half_open_budget_is_respected(budget in 1u32..=5) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let breaker = CircuitBreaker::new(
                CircuitBreaker::builder()
                    .failure_threshold(1)
                    .reset_timeout(Duration::from_millis(10))
                    .half_open_requests(budget)
                    .name("prop")
                    .build()
                    .unwrap(),
            );

            breaker.try_acquire().unwrap();
            breaker.record_failure(&TypedError::unknown("boom"));
            prop_assert_eq!(breaker.state(), CircuitState::Open);

            tokio::time::sleep(Duration::from_millis(20)).await;

            let mut admitted = 0;
            for _ in 0..(budget + 3) {
                if breaker.try_acquire().is_ok() {
                    admitted += 1;
                }
            }
            prop_assert_eq!(admitted, budget);
            Ok(())
        })?;
    }
}
