//! Property-based tests for resilient-exec's core invariants.
//!
//! Run with: cargo test --test property_tests

mod property;
