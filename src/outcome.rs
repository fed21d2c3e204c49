//! The result of one [`crate::Executor::run`] call, and the metrics attached
//! to every outcome regardless of how the call ended.

use std::time::Duration;

use resilient_exec_core::{RetryHistoryEntry, TypedError};

/// Per-call summary, finalized exactly once before `run` returns.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub total_attempts: u32,
    pub total_retries: u32,
    pub total_duration: Duration,
    pub last_error: Option<TypedError>,
    pub retry_history: Vec<RetryHistoryEntry>,
}

impl Metrics {
    pub(crate) fn empty() -> Self {
        Metrics {
            total_attempts: 0,
            total_retries: 0,
            total_duration: Duration::ZERO,
            last_error: None,
            retry_history: Vec::new(),
        }
    }
}

/// The discriminated outcome of one call. The variant itself carries the
/// disposition — there is no separate `ok` field or `type` string to keep
/// in sync with it.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Success(T, Metrics),
    Failure(TypedError, Metrics),
    Timeout(TypedError, Metrics),
    Aborted(TypedError, Metrics),
}

impl<T> Outcome<T> {
    /// `true` iff this is [`Outcome::Success`].
    pub fn ok(&self) -> bool {
        matches!(self, Outcome::Success(..))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Success(data, _) => Some(data),
            _ => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Success(data, _) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TypedError> {
        match self {
            Outcome::Success(..) => None,
            Outcome::Failure(error, _) | Outcome::Timeout(error, _) | Outcome::Aborted(error, _) => Some(error),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        match self {
            Outcome::Success(_, metrics)
            | Outcome::Failure(_, metrics)
            | Outcome::Timeout(_, metrics)
            | Outcome::Aborted(_, metrics) => metrics,
        }
    }

    pub fn into_metrics(self) -> Metrics {
        match self {
            Outcome::Success(_, metrics)
            | Outcome::Failure(_, metrics)
            | Outcome::Timeout(_, metrics)
            | Outcome::Aborted(_, metrics) => metrics,
        }
    }

    /// Converts to `Result<T, TypedError>`, discarding metrics — the
    /// building block [`crate::Executor::run_or_throw`] is a thin wrapper
    /// around.
    pub fn into_result(self) -> Result<T, TypedError> {
        match self {
            Outcome::Success(data, _) => Ok(data),
            Outcome::Failure(error, _) | Outcome::Timeout(error, _) | Outcome::Aborted(error, _) => Err(error),
        }
    }
}

/// Buckets produced by [`crate::partition_all`].
pub struct Partitioned<T> {
    pub ok: Vec<T>,
    pub errors: Vec<TypedError>,
    pub failure: Vec<TypedError>,
    pub aborted: Vec<TypedError>,
    pub timeout: Vec<TypedError>,
}

/// Splits a batch result vector into success and failure buckets.
/// `errors` holds every non-success error regardless of kind; `failure`,
/// `aborted`, and `timeout` additionally break that set down by outcome
/// variant so callers don't have to match twice.
pub fn partition_all<T>(results: Vec<Outcome<T>>) -> Partitioned<T> {
    let mut partitioned = Partitioned {
        ok: Vec::new(),
        errors: Vec::new(),
        failure: Vec::new(),
        aborted: Vec::new(),
        timeout: Vec::new(),
    };

    for outcome in results {
        match outcome {
            Outcome::Success(data, _) => partitioned.ok.push(data),
            Outcome::Failure(error, _) => {
                partitioned.errors.push(error.clone());
                partitioned.failure.push(error);
            }
            Outcome::Timeout(error, _) => {
                partitioned.errors.push(error.clone());
                partitioned.timeout.push(error);
            }
            Outcome::Aborted(error, _) => {
                partitioned.errors.push(error.clone());
                partitioned.aborted.push(error);
            }
        }
    }

    partitioned
}
