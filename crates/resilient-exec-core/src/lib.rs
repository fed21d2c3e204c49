//! Shared building blocks for `resilient-exec`: the typed-error model and
//! its rule-driven normalizer, backoff/jitter strategies, and the event
//! listener plumbing the executor and circuit breaker crates both use.
//!
//! This crate has no async runtime dependency — it is pure data and pure
//! functions, so it can be unit-tested and reused without pulling in
//! `tokio`.

pub mod backoff;
pub mod error;
pub mod events;
pub mod jitter;
pub mod rules;

pub use backoff::{compute_delay, RetryStrategy};
pub use error::{ErrorCode, RetryHistoryEntry, TypedError};
pub use events::{Event, FnListener, Listener, Listeners};
pub use jitter::{apply_jitter, Jitter};
pub use rules::{
    instance, when, Aborted, ClassifiableError, CodeBuilder, ConfigError, ErrorBody,
    HttpStatusError, Normalizer, RawError, Rule, RulesMode, TimedOut, WhenBuilder,
};
