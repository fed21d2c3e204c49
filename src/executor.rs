//! The single-task engine: `Executor::run` and its supporting per-call
//! option type.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use resilient_exec_circuitbreaker::{CircuitBreaker, CircuitState};
use resilient_exec_core::{apply_jitter, compute_delay, ErrorCode, Jitter, Normalizer, RawError, RetryHistoryEntry, RetryStrategy, TypedError};
use tokio_util::sync::CancellationToken;

use crate::config::{ExecutorBuilder, ExecutorConfig};
use crate::hooks::Hooks;
use crate::outcome::{Metrics, Outcome};

/// Carried by every attempt so a cooperating task can observe cancellation
/// and unwind early instead of running to completion unobserved.
#[derive(Clone)]
pub struct TaskContext {
    pub cancellation: CancellationToken,
}

/// Per-call overrides layered on top of an [`Executor`]'s instance defaults.
/// Every field left `None` inherits the instance default; `on_success` has
/// no instance-level counterpart since it sees the task's output type `T`
/// (see [`crate::hooks::Hooks`]'s doc comment).
pub struct CallOptions<T> {
    pub timeout: Option<Duration>,
    pub ignore_abort: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_strategy: Option<RetryStrategy>,
    pub jitter: Option<Jitter>,
    pub should_retry: Option<Arc<dyn Fn(u32, &TypedError) -> bool + Send + Sync>>,
    pub signal: Option<CancellationToken>,
    pub normalizer: Option<Arc<Normalizer>>,
    pub on_success: Option<Arc<dyn Fn(&T, &Metrics) + Send + Sync>>,
}

impl<T> Clone for CallOptions<T> {
    fn clone(&self) -> Self {
        CallOptions {
            timeout: self.timeout,
            ignore_abort: self.ignore_abort,
            max_retries: self.max_retries,
            retry_strategy: self.retry_strategy.clone(),
            jitter: self.jitter.clone(),
            should_retry: self.should_retry.clone(),
            signal: self.signal.clone(),
            normalizer: self.normalizer.clone(),
            on_success: self.on_success.clone(),
        }
    }
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        CallOptions {
            timeout: None,
            ignore_abort: None,
            max_retries: None,
            retry_strategy: None,
            jitter: None,
            should_retry: None,
            signal: None,
            normalizer: None,
            on_success: None,
        }
    }
}

impl<T> CallOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn on_success(mut self, f: impl Fn(&T, &Metrics) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }
}

/// A configured resilient task runner: one circuit breaker, one normalizer,
/// one set of instance defaults, reusable across any number of [`Executor::run`]
/// and [`Executor::run_all`] calls.
pub struct Executor {
    pub(crate) config: Arc<ExecutorConfig>,
    breaker: Option<CircuitBreaker>,
    last_circuit_state: Mutex<Option<CircuitState>>,
}

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// An executor with every default: no timeout, no retries, no breaker,
    /// built-in rules only. Cannot fail, unlike [`ExecutorBuilder::build`].
    pub fn new() -> Self {
        Executor::from_config(
            ExecutorBuilder::new()
                .build()
                .expect("default executor configuration is always valid"),
        )
    }

    /// Wraps an already-built [`ExecutorConfig`] — the basis both
    /// `Executor::builder()...build()` call sites and `with_config` build on.
    pub fn from_config(config: ExecutorConfig) -> Self {
        let breaker = config.circuit_breaker.clone().map(CircuitBreaker::new);
        let last_circuit_state = Mutex::new(breaker.as_ref().map(CircuitBreaker::state));
        Executor {
            config: Arc::new(config),
            breaker,
            last_circuit_state,
        }
    }

    /// Clones this executor's configuration into a fresh builder, applies
    /// `configure`, and builds a new, independent `Executor` — the Rust
    /// analogue of `withConfig`. The breaker (if any) is reconstructed from
    /// scratch, so the returned executor starts with fresh breaker state.
    pub fn with_config(
        &self,
        configure: impl FnOnce(ExecutorBuilder) -> ExecutorBuilder,
    ) -> Result<Executor, resilient_exec_core::ConfigError> {
        let builder = configure(self.config.to_builder());
        Ok(Executor::from_config(builder.build()?))
    }

    fn observe_circuit_transition(&self, hooks: &Hooks) {
        let Some(breaker) = &self.breaker else { return };
        let new_state = breaker.state();
        let mut last = self.last_circuit_state.lock().expect("circuit snapshot mutex poisoned");
        if *last != Some(new_state) {
            if let Some(previous) = *last {
                hooks.fire_circuit_state_change(previous, new_state);
            }
            *last = Some(new_state);
        }
    }

    fn update_breaker(&self, success: bool, error: Option<&TypedError>, hooks: &Hooks) {
        if let Some(breaker) = &self.breaker {
            if success {
                breaker.record_success();
            } else if let Some(error) = error {
                breaker.record_failure(error);
            }
            self.observe_circuit_transition(hooks);
        }
    }

    /// Runs `task` to completion, applying timeout, retry, breaker and
    /// normalization policy. Never panics on a task failure and never
    /// returns anything other than an [`Outcome`] — use
    /// [`Executor::run_or_throw`] for `?`-composable call sites.
    pub async fn run<T, E, F, Fut>(&self, task: F, mut opts: CallOptions<T>) -> Outcome<T>
    where
        F: Fn(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let start = Instant::now();
        let hooks = &self.config.hooks;
        let logger = self.config.logger.as_ref();

        let timeout = opts.timeout.take().or(self.config.timeout);
        let ignore_abort = opts.ignore_abort.take().unwrap_or(self.config.ignore_abort);
        let max_retries = opts.max_retries.take().unwrap_or(self.config.retry.max_retries);
        let strategy = opts.retry_strategy.take().unwrap_or_else(|| self.config.retry.strategy.clone());
        let jitter = opts.jitter.take().unwrap_or_else(|| self.config.retry.jitter.clone());
        let should_retry = opts.should_retry.take().or_else(|| self.config.retry.should_retry.clone());
        let normalizer = opts.normalizer.take().unwrap_or_else(|| Arc::clone(&self.config.normalizer));
        let outer = opts
            .signal
            .take()
            .or_else(|| self.config.signal.clone())
            .unwrap_or_default();
        let on_success = opts.on_success.take();

        strategy.validate().expect("invalid retry strategy in call options");
        jitter.validate().expect("invalid jitter ratio in call options");

        // Step 2: breaker admission.
        if let Some(breaker) = &self.breaker {
            let admitted = breaker.try_acquire();
            self.observe_circuit_transition(hooks);
            if admitted.is_err() {
                logger.warn(&format!("circuit breaker '{}' rejected call: open", breaker.name()));
                let error = TypedError::circuit_open(format!("circuit breaker '{}' is open", breaker.name()));
                let metrics = Metrics::empty();
                hooks.fire_finally(&metrics);
                return Outcome::Failure(error, metrics);
            }
        }

        // Step 3: outer-signal short-circuit.
        if outer.is_cancelled() {
            let error = TypedError::aborted("call cancelled before the first attempt");
            hooks.fire_abort(&error);
            logger.warn("call aborted before its first attempt");
            let metrics = Metrics::empty();
            hooks.fire_finally(&metrics);
            self.update_breaker(false, Some(&error), hooks);
            return Outcome::Aborted(error, metrics);
        }

        let mut rng = rand::rng();
        let mut attempt: u32 = 1;
        let mut retry_history: Vec<RetryHistoryEntry> = Vec::new();
        let mut last_error: Option<TypedError> = None;

        // Step 4-6: the attempt loop.
        let result: Result<T, TypedError> = loop {
            #[cfg(feature = "metrics")]
            metrics::counter!("resilient_exec_attempts_total").increment(1);

            let attempt_token = outer.child_token();
            let ctx = TaskContext {
                cancellation: attempt_token.clone(),
            };

            let attempt_result: Result<T, TypedError> = match timeout {
                Some(timeout) => {
                    tokio::select! {
                        res = task(ctx) => res.map_err(|e| normalizer.normalize(&RawError::new(e))),
                        _ = tokio::time::sleep(timeout) => {
                            // Trip the inner token before surfacing the
                            // timeout error so a cooperating task still
                            // sees cancellation, per the timeout-then-cancel
                            // ordering this engine preserves.
                            attempt_token.cancel();
                            Err(TypedError::timeout(format!("attempt exceeded {timeout:?}")))
                        }
                    }
                }
                None => task(ctx).await.map_err(|e| normalizer.normalize(&RawError::new(e))),
            };

            match attempt_result {
                Ok(value) => {
                    logger.info(&format!("attempt {attempt} succeeded"));
                    if let Some(on_success) = &on_success {
                        let snapshot = Metrics {
                            total_attempts: attempt,
                            total_retries: attempt - 1,
                            total_duration: start.elapsed(),
                            last_error: last_error.clone(),
                            retry_history: retry_history.clone(),
                        };
                        Hooks::guard(|| on_success(&value, &snapshot));
                    }
                    break Ok(value);
                }
                Err(error) => {
                    last_error = Some(error.clone());
                    let is_aborted = error.code == ErrorCode::ABORTED;

                    if is_aborted {
                        hooks.fire_abort(&error);
                    }
                    if !(ignore_abort && is_aborted) {
                        let snapshot = Metrics {
                            total_attempts: attempt,
                            total_retries: attempt - 1,
                            total_duration: start.elapsed(),
                            last_error: last_error.clone(),
                            retry_history: retry_history.clone(),
                        };
                        hooks.fire_error(&error, &snapshot);
                        logger.error(&format!("attempt {attempt} failed: {error}"));
                    } else {
                        logger.warn(&format!("attempt {attempt} aborted"));
                    }

                    // Short-circuit: each condition is only evaluated once the
                    // prior ones are known false, so `should_retry` never
                    // fires on an attempt the engine was always going to stop
                    // on for an unrelated reason.
                    let stop = is_aborted
                        || !error.retryable
                        || attempt > max_retries
                        || should_retry.as_ref().is_some_and(|f| !f(attempt, &error));

                    if stop {
                        break Err(error);
                    }

                    #[cfg(feature = "metrics")]
                    metrics::counter!("resilient_exec_retries_total", "code" => error.code.as_str().to_string())
                        .increment(1);

                    let base_delay = compute_delay(&strategy, attempt);
                    let delay = apply_jitter(base_delay, &jitter, &mut rng);
                    retry_history.push(RetryHistoryEntry {
                        attempt,
                        error: error.clone(),
                        delay,
                        elapsed: start.elapsed(),
                    });
                    hooks.fire_retry(attempt, &error, delay);
                    logger.info(&format!("retrying attempt {attempt} after {delay:?}"));

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            attempt += 1;
                        }
                        _ = outer.cancelled() => {
                            break Err(TypedError::aborted("cancelled during retry sleep"));
                        }
                    }
                }
            }
        };

        // Step 7: outcome packaging.
        let metrics = Metrics {
            total_attempts: attempt,
            total_retries: attempt - 1,
            total_duration: start.elapsed(),
            last_error,
            retry_history,
        };
        hooks.fire_finally(&metrics);

        #[cfg(feature = "metrics")]
        ::metrics::histogram!("resilient_exec_call_duration_ms")
            .record(metrics.total_duration.as_secs_f64() * 1000.0);

        // Step 8: breaker update.
        match result {
            Ok(value) => {
                self.update_breaker(true, None, hooks);
                Outcome::Success(value, metrics)
            }
            Err(error) => {
                self.update_breaker(false, Some(&error), hooks);
                if error.code == ErrorCode::ABORTED {
                    Outcome::Aborted(error, metrics)
                } else if error.code == ErrorCode::TIMEOUT {
                    Outcome::Timeout(error, metrics)
                } else {
                    Outcome::Failure(error, metrics)
                }
            }
        }
    }

    /// Thin wrapper around [`Executor::run`] for `?`-composable call sites —
    /// the Rust analogue of `runOrThrow`.
    pub async fn run_or_throw<T, E, F, Fut>(&self, task: F, opts: CallOptions<T>) -> Result<T, TypedError>
    where
        F: Fn(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(task, opts).await.into_result()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Executor::new()
    }
}
