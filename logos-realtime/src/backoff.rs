//! Reconnect delay computation.
//!
//! Exponential backoff with additive jitter and a hard ceiling:
//! ```text
//! delay(n) = min(base * 2^(n-1) + jitter, ceiling)      jitter ∈ [0, max_jitter)
//!
//! n=1 → 1s..2s   n=2 → 2s..3s   n=3 → 4s..5s   ...   n≥6 → 30s
//! ```
//!
//! The policy itself is pure; randomness comes from a [`JitterSource`] so
//! tests can pin it.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (before jitter)
    pub base_delay: Duration,
    /// Ceiling applied after jitter
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based; 0 is treated as 1).
    ///
    /// `jitter` is clamped to `max_jitter` so a misbehaving source cannot
    /// push the delay past what the policy allows.
    pub fn next_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor);
        let jitter = jitter.min(self.max_jitter);
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    /// Convenience: sample jitter from `source` and compute the delay.
    pub fn next_delay_with(&self, attempt: u32, source: &mut dyn JitterSource) -> Duration {
        let jitter = source.sample(self.max_jitter);
        self.next_delay(attempt, jitter)
    }
}

/// Source of the random component added to each delay.
pub trait JitterSource: Send {
    /// Return a value in `[0, max)`; `Duration::ZERO` when `max` is zero.
    fn sample(&mut self, max: Duration) -> Duration;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&mut self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Constant jitter, for deterministic schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn sample(&mut self, max: Duration) -> Duration {
        self.0.min(max)
    }
}
