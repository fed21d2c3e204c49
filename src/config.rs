//! Instance-level defaults and the per-call override layer.

use std::sync::Arc;
use std::time::Duration;

use resilient_exec_circuitbreaker::CircuitBreakerConfig;
use resilient_exec_core::{ConfigError, Jitter, Normalizer, Rule, RulesMode, RetryStrategy, TypedError};
use tokio_util::sync::CancellationToken;

use crate::hooks::{Hooks, Logger, TracingLogger};

/// Retry policy: how many times to retry, how the delay grows, and an
/// optional extra predicate layered on top of the normalized error's
/// `retryable` flag.
#[derive(Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub strategy: RetryStrategy,
    pub jitter: Jitter,
    pub should_retry: Option<Arc<dyn Fn(u32, &TypedError) -> bool + Send + Sync>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 0,
            strategy: RetryStrategy::fixed(Duration::ZERO),
            jitter: Jitter::None,
            should_retry: None,
        }
    }
}

impl RetryConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.jitter.validate()
    }
}

/// Instance-wide defaults, built once via [`crate::ExecutorBuilder`] and
/// shared (behind an `Arc`) by every call made through the resulting
/// [`crate::Executor`]. Per-call [`CallOptions`](crate::executor::CallOptions)
/// override these field-by-field.
pub struct ExecutorConfig {
    pub(crate) timeout: Option<Duration>,
    pub(crate) ignore_abort: bool,
    pub(crate) retry: RetryConfig,
    pub(crate) circuit_breaker: Option<CircuitBreakerConfig>,
    pub(crate) normalizer: Arc<Normalizer>,
    pub(crate) hooks: Hooks,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) signal: Option<CancellationToken>,
    // Kept alongside the already-merged `normalizer` so `with_config` can
    // reconstruct a builder without re-deriving a rule list from compiled
    // state.
    rules: Vec<Arc<dyn Rule>>,
    rules_mode: RulesMode,
}

impl ExecutorConfig {
    /// Starts a builder seeded with this config's values — the basis for
    /// [`crate::Executor::with_config`]'s clone-with-override semantics.
    pub fn to_builder(&self) -> ExecutorBuilder {
        ExecutorBuilder {
            timeout: self.timeout,
            ignore_abort: self.ignore_abort,
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            rules: self.rules.clone(),
            rules_mode: self.rules_mode,
            hooks: self.hooks.clone(),
            logger: Arc::clone(&self.logger),
            signal: self.signal.clone(),
        }
    }
}

/// Builder for [`ExecutorConfig`], consumed by [`crate::Executor::builder`].
pub struct ExecutorBuilder {
    timeout: Option<Duration>,
    ignore_abort: bool,
    retry: RetryConfig,
    circuit_breaker: Option<CircuitBreakerConfig>,
    rules: Vec<Arc<dyn Rule>>,
    rules_mode: RulesMode,
    hooks: Hooks,
    logger: Arc<dyn Logger>,
    signal: Option<CancellationToken>,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        ExecutorBuilder {
            timeout: None,
            ignore_abort: true,
            retry: RetryConfig::default(),
            circuit_breaker: None,
            rules: Vec::new(),
            rules_mode: RulesMode::Extend,
            hooks: Hooks::default(),
            logger: Arc::new(TracingLogger),
            signal: None,
        }
    }

    /// Per-attempt timeout. `None` (the default) means no timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// When `true` (the default), an `ABORTED` error does not fire
    /// `on_error` — only `on_abort`.
    pub fn ignore_abort(mut self, ignore_abort: bool) -> Self {
        self.ignore_abort = ignore_abort;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry.strategy = strategy;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.retry.jitter = jitter;
        self
    }

    pub fn should_retry(mut self, f: impl Fn(u32, &TypedError) -> bool + Send + Sync + 'static) -> Self {
        self.retry.should_retry = Some(Arc::new(f));
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Adds one user rule, tried in the order added, ahead of the built-ins
    /// when `rules_mode` is [`RulesMode::Extend`].
    pub fn rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    pub fn rules_mode(mut self, mode: RulesMode) -> Self {
        self.rules_mode = mode;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// The outer cancellation token every call inherits unless overridden by
    /// `CallOptions::signal`.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn build(self) -> Result<ExecutorConfig, ConfigError> {
        // `CircuitBreakerConfig` validates its own thresholds at its own
        // `build()`, so there is nothing left to re-check here.
        self.retry.validate()?;
        let normalizer = Normalizer::build(self.rules.clone(), self.rules_mode)?;

        Ok(ExecutorConfig {
            timeout: self.timeout,
            ignore_abort: self.ignore_abort,
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
            normalizer: Arc::new(normalizer),
            hooks: self.hooks,
            logger: self.logger,
            signal: self.signal,
            rules: self.rules,
            rules_mode: self.rules_mode,
        })
    }
}
