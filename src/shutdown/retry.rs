//! Retry policy for stop requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * i` before attempt `i`.
    #[default]
    Linear,
    /// `base * 2^(i-2)` before attempt `i`.
    Exponential,
}

impl std::str::FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!(
                "unknown backoff '{}', expected 'linear' or 'exponential'",
                other
            )),
        }
    }
}

/// Bounded retry with growing waits.
///
/// # Invariants
/// - `max_attempts >= 1`
/// - `delay_before(i)` is non-decreasing in `i` and never exceeds `max_delay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before 1-indexed `attempt`. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2_u32.checked_pow(attempt - 2).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(4));
        assert_eq!(policy.delay_before(3), Duration::from_secs(6));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1)).with_backoff(Backoff::Exponential);
        let delays: Vec<_> = (1..=5).map(|i| policy.delay_before(i).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8]);
    }

    #[test]
    fn test_delays_are_non_decreasing_and_capped() {
        for backoff in [Backoff::Linear, Backoff::Exponential] {
            let policy = RetryPolicy::new(40, Duration::from_secs(2))
                .with_backoff(backoff)
                .with_max_delay(Duration::from_secs(30));
            let mut prev = Duration::ZERO;
            for attempt in 1..=40 {
                let d = policy.delay_before(attempt);
                assert!(d >= prev);
                assert!(d <= Duration::from_secs(30));
                prev = d;
            }
        }
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).attempts(), 1);
    }

    #[test]
    fn test_parse_backoff() {
        assert_eq!("Linear".parse::<Backoff>(), Ok(Backoff::Linear));
        assert_eq!(" exponential ".parse::<Backoff>(), Ok(Backoff::Exponential));
        assert!("fibonacci".parse::<Backoff>().is_err());
    }
}
