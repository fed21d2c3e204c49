//! Pure backoff strategies — one base-delay computation per attempt.
//!
//! The four named strategies are expressed as a closed enum rather than a
//! trait object by default so the common cases avoid an `Arc` indirection;
//! [`RetryStrategy::custom`] escapes to an arbitrary function when needed.

use std::sync::Arc;
use std::time::Duration;

use crate::rules::ConfigError;

/// How the base retry delay for attempt `n` is computed.
#[derive(Clone)]
pub enum RetryStrategy {
    /// A constant delay for every retry.
    Fixed(Duration),
    /// `min(base * factor^(attempt-1), cap)`.
    Exponential {
        base: Duration,
        factor: f64,
        cap: Option<Duration>,
    },
    /// `min(base * fib(attempt), cap)` with `fib(1) = fib(2) = 1`.
    Fibonacci { base: Duration, cap: Option<Duration> },
    /// Caller-supplied function of the attempt number (1-indexed).
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryStrategy {
    pub fn fixed(delay: Duration) -> Self {
        RetryStrategy::Fixed(delay)
    }

    /// `factor` defaults to `2.0` when built via the executor's builder
    /// default; here it must be supplied explicitly and validated
    /// (`factor > 1.0`) by [`RetryStrategy::validate`].
    pub fn exponential(base: Duration, factor: f64, cap: Option<Duration>) -> Self {
        RetryStrategy::Exponential { base, factor, cap }
    }

    pub fn fibonacci(base: Duration, cap: Option<Duration>) -> Self {
        RetryStrategy::Fibonacci { base, cap }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        RetryStrategy::Custom(Arc::new(f))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let RetryStrategy::Exponential { factor, .. } = self {
            if *factor <= 1.0 {
                return Err(ConfigError::InvalidBackoffFactor(*factor));
            }
        }
        Ok(())
    }
}

/// Computes the base delay (before jitter) for the given 1-indexed attempt.
pub fn compute_delay(strategy: &RetryStrategy, attempt: u32) -> Duration {
    match strategy {
        RetryStrategy::Fixed(delay) => *delay,
        RetryStrategy::Exponential { base, factor, cap } => {
            let multiplier = factor.powi(attempt.saturating_sub(1) as i32);
            let delay = base.mul_f64(multiplier);
            match cap {
                Some(cap) => delay.min(*cap),
                None => delay,
            }
        }
        RetryStrategy::Fibonacci { base, cap } => {
            let delay = base.mul_f64(fibonacci(attempt) as f64);
            match cap {
                Some(cap) => delay.min(*cap),
                None => delay,
            }
        }
        RetryStrategy::Custom(f) => f(attempt),
    }
}

/// `fib(1) = fib(2) = 1`.
fn fibonacci(attempt: u32) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 2..attempt {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if attempt == 1 {
        1
    } else {
        b
    }
}
