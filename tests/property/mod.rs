//! Property-based tests for resilient-exec.
//!
//! These use proptest to generate random inputs and check that the
//! circuit breaker and batch engine invariants hold regardless of the
//! specific values generated.

pub mod batch;
pub mod circuit_breaker;
