//! Bounded exponential-backoff retry policy.

use std::time::Duration;

/// How often and how patiently an event is retried before it is dropped.
///
/// The delay after the `n`-th failed attempt is
/// `min(initial_delay * multiplier^(n-1), max_delay)`.
///
/// # Example
///
/// ```rust
/// use pbridge_plugin::channel::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 3,
///     initial_delay: Duration::from_millis(100),
///     ..Default::default()
/// };
/// assert_eq!(policy.delay_after(2), Duration::from_millis(200));
/// assert!(policy.is_exhausted(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total delivery attempts per event, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempts` consecutive failures (1-based).
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// True once `attempts` failures have used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Sum of all delays an event can wait before being dropped.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }
}
