//! A resilient asynchronous task executor.
//!
//! `resilient-exec` wraps a unit of work and returns a typed, non-panicking
//! [`Outcome`] describing what happened — success, failure, timeout, or
//! aborted — together with attempt-level [`Metrics`]. Four sub-engines
//! compose underneath that one call: cancellation/timeout coordination
//! (`resilient-exec-core`'s [`tokio_util::sync::CancellationToken`]
//! composition), retry scheduling with pluggable backoff and jitter
//! (`resilient-exec-core`), a circuit breaker with closed/open/half-open
//! semantics (`resilient-exec-circuitbreaker`), and a rule-driven error
//! normalizer (`resilient-exec-core`). [`Executor::run_all`] fans a batch of
//! tasks out through a concurrency-bounded worker pool over the same
//! single-task engine.
//!
//! ```no_run
//! use resilient_exec::{Executor, CallOptions};
//!
//! # async fn demo() {
//! let executor = Executor::new();
//! let outcome = executor
//!     .run(
//!         |_ctx| async { Ok::<_, std::io::Error>(42) },
//!         CallOptions::new(),
//!     )
//!     .await;
//! assert!(outcome.ok());
//! # }
//! ```
//!
//! The executor does not perform I/O, own a transport or connection pool, or
//! persist state across processes; it does not attempt to kill work that
//! refuses cancellation, only stops waiting for it. It is not a scheduler
//! across tasks and not a distributed coordinator — the breaker is
//! per-instance.

pub mod batch;
pub mod cancellation;
pub mod config;
pub mod executor;
pub mod hooks;
pub mod outcome;

pub use batch::BatchOptions;
pub use config::{ExecutorBuilder, ExecutorConfig, RetryConfig};
pub use executor::{CallOptions, Executor, TaskContext};
pub use hooks::{Hooks, Logger, TracingLogger};
pub use outcome::{partition_all, Metrics, Outcome, Partitioned};

pub use resilient_exec_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitState};
pub use resilient_exec_core::{
    apply_jitter, compute_delay, instance, when, Aborted, ClassifiableError, CodeBuilder, ConfigError, ErrorBody,
    ErrorCode, HttpStatusError, Jitter, Normalizer, RawError, Rule, RulesMode, RetryStrategy, TimedOut, TypedError,
    WhenBuilder,
};

use std::future::Future;
use std::sync::OnceLock;

/// The process-wide default [`Executor`], lazily built on first use by the
/// free-function shortcuts below. Convenience glue, not a design pillar —
/// callers that want explicit control over configuration should build and
/// hold their own [`Executor`] instead.
fn default_executor() -> &'static Executor {
    static DEFAULT: OnceLock<Executor> = OnceLock::new();
    DEFAULT.get_or_init(Executor::new)
}

/// Runs `task` through the process-wide default [`Executor`]. Equivalent to
/// `Executor::new().run(..)` except the executor (and its breaker state, if
/// any call site ever configures one through [`with_default`]) is shared
/// across every call to this function for the lifetime of the process.
pub async fn run<T, E, F, Fut>(task: F, opts: CallOptions<T>) -> Outcome<T>
where
    F: Fn(TaskContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    default_executor().run(task, opts).await
}

/// Like [`run`], but rethrows the normalized error instead of returning an
/// [`Outcome`] — the shortcut analogue of [`Executor::run_or_throw`].
pub async fn run_or_throw<T, E, F, Fut>(task: F, opts: CallOptions<T>) -> Result<T, TypedError>
where
    F: Fn(TaskContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    default_executor().run(task, opts).await.into_result()
}

/// Runs `tasks` through the process-wide default [`Executor`]'s
/// [`Executor::run_all`].
pub async fn all<T, E, F, Fut>(tasks: Vec<F>, opts: BatchOptions<T>) -> Vec<Outcome<T>>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: std::error::Error + Send + Sync + 'static,
{
    default_executor().run_all(tasks, opts).await
}

/// Like [`all`], but rethrows the first non-success error in input order —
/// the shortcut analogue of [`Executor::run_all_or_throw`].
pub async fn all_or_throw<T, E, F, Fut>(tasks: Vec<F>, opts: BatchOptions<T>) -> Result<Vec<T>, TypedError>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: std::error::Error + Send + Sync + 'static,
{
    default_executor().run_all_or_throw(tasks, opts).await
}

/// Exposes the process-wide default [`Executor`] for read-only inspection
/// (e.g. checking its circuit breaker state in a health check). Building a
/// differently-configured default is not supported — construct an explicit
/// [`Executor`] instead.
pub fn with_default() -> &'static Executor {
    default_executor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn shortcut_run_delegates_to_the_lazy_default() {
        let outcome = run(
            |_ctx: TaskContext| async { Ok::<u32, Infallible>(7) },
            CallOptions::new(),
        )
        .await;
        assert!(outcome.ok());
        assert_eq!(outcome.data(), Some(&7));
    }

    #[tokio::test]
    async fn shortcut_run_or_throw_surfaces_the_normalized_error() {
        let result = run_or_throw(
            |_ctx: TaskContext| async { Err::<u32, _>(HttpStatusError::new(404, "missing")) },
            CallOptions::new(),
        )
        .await;
        let error = result.unwrap_err();
        assert_eq!(error.code, ErrorCode::HTTP);
    }

    #[tokio::test]
    async fn shortcut_all_runs_every_task() {
        let tasks: Vec<_> = (0..3)
            .map(|i| move |_ctx: TaskContext| async move { Ok::<u32, Infallible>(i) })
            .collect();
        let outcomes = all(tasks, BatchOptions::new()).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(Outcome::ok));
    }

    #[tokio::test]
    async fn shortcut_all_or_throw_rethrows_first_failure() {
        let tasks: Vec<_> = vec![
            |_ctx: TaskContext| async { Ok::<u32, std::io::Error>(1) },
            |_ctx: TaskContext| async { Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset)) },
        ];
        let result = all_or_throw(tasks, BatchOptions::new()).await;
        assert!(result.is_err());
    }

    #[test]
    fn with_default_returns_the_same_instance_across_calls() {
        let a = with_default() as *const Executor;
        let b = with_default() as *const Executor;
        assert_eq!(a, b);
    }
}
