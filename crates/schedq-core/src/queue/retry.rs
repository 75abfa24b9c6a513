//! Retry policy: decides backoff delays for the promoter after backend failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with an upper bound and optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Spread delays over `[d/2, d]` so restarted schedulers do not retry in lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-indexed): `base_delay * multiplier^(failures - 1)`, capped at
    /// `max_delay`.
    ///
    /// Example with base_delay=100ms, multiplier=2.0:
    /// - failure 1: 100ms
    /// - failure 2: 200ms
    /// - failure 3: 400ms
    pub fn next_delay(&self, failures: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = (base_secs * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(delay_secs.max(0.0));

        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            rand::thread_rng().gen_range(half..=delay)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(10),
        )
    }
}
