//! Jitter transforms — perturb a computed base delay to avoid synchronized
//! retry storms across many callers.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::rules::ConfigError;

/// How [`apply_jitter`] perturbs a base delay. Ratios are percentages in
/// `0..=100`.
#[derive(Clone)]
pub enum Jitter {
    /// No perturbation.
    None,
    /// Uniform in `[delay * (1 - ratio/100), delay]`.
    Full { ratio: f64 },
    /// Uniform in `[delay * (1 - ratio/200), delay]` — half the window of
    /// `Full` around the same base.
    Equal { ratio: f64 },
    /// Caller-supplied transform.
    Custom(Arc<dyn Fn(Duration) -> Duration + Send + Sync>),
}

impl Jitter {
    pub fn full(ratio: f64) -> Self {
        Jitter::Full { ratio }
    }

    pub fn equal(ratio: f64) -> Self {
        Jitter::Equal { ratio }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Duration) -> Duration + Send + Sync + 'static,
    {
        Jitter::Custom(Arc::new(f))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = match self {
            Jitter::Full { ratio } | Jitter::Equal { ratio } => Some(*ratio),
            _ => None,
        };
        if let Some(ratio) = ratio {
            if !(0.0..=100.0).contains(&ratio) {
                return Err(ConfigError::JitterRatioOutOfRange(ratio));
            }
        }
        Ok(())
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::None
    }
}

/// Applies `jitter` to `delay`. Delays `<= 0` are returned unchanged
/// regardless of `jitter`.
pub fn apply_jitter(delay: Duration, jitter: &Jitter, rng: &mut impl Rng) -> Duration {
    if delay.is_zero() {
        return delay;
    }

    match jitter {
        Jitter::None => delay,
        Jitter::Full { ratio } => {
            let window = delay.mul_f64(ratio / 100.0);
            let low = delay.saturating_sub(window);
            uniform(rng, low, delay)
        }
        Jitter::Equal { ratio } => {
            let window = delay.mul_f64(ratio / 200.0);
            let low = delay.saturating_sub(window);
            uniform(rng, low, delay)
        }
        Jitter::Custom(f) => f(delay),
    }
}

fn uniform(rng: &mut impl Rng, low: Duration, high: Duration) -> Duration {
    if low >= high {
        return high;
    }
    let low_secs = low.as_secs_f64();
    let high_secs = high.as_secs_f64();
    let value = rng.random_range(low_secs..=high_secs);
    Duration::from_secs_f64(value.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn none_and_zero_delay_are_unchanged() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            apply_jitter(Duration::from_millis(100), &Jitter::None, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            apply_jitter(Duration::ZERO, &Jitter::full(50.0), &mut rng),
            Duration::ZERO
        );
    }

    #[test]
    fn full_jitter_stays_within_window() {
        let mut rng = StdRng::seed_from_u64(42);
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let delay = apply_jitter(base, &Jitter::full(50.0), &mut rng);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= base);
        }
    }

    #[test]
    fn equal_jitter_has_half_the_window_of_full() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = Duration::from_millis(1000);
        for _ in 0..200 {
            let delay = apply_jitter(base, &Jitter::equal(50.0), &mut rng);
            assert!(delay >= Duration::from_millis(750));
            assert!(delay <= base);
        }
    }

    #[test]
    fn custom_jitter_delegates() {
        let mut rng = StdRng::seed_from_u64(3);
        let spec = Jitter::custom(|d| d * 2);
        assert_eq!(
            apply_jitter(Duration::from_millis(10), &spec, &mut rng),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        assert!(Jitter::full(150.0).validate().is_err());
        assert!(Jitter::equal(-1.0).validate().is_err());
        assert!(Jitter::full(50.0).validate().is_ok());
    }
}
