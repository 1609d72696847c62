//! Exponential backoff, shared by the xDS client reconnect loop, the registry
//! lease-renewal loop, and the config source's watch retry path.

use std::time::Duration;

use crate::error::{Error, Result};

/// Exponential backoff policy, following the shape of gRFC A6.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_attempts: Option<usize>,
}

impl BackoffPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration, backoff_multiplier: f64) -> Result<Self> {
        if initial_backoff.is_zero() {
            return Err(Error::Validation("initial_backoff must be greater than zero".into()));
        }
        if backoff_multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "backoff_multiplier must be >= 1.0, got {backoff_multiplier}"
            )));
        }
        if max_backoff < initial_backoff {
            return Err(Error::Validation(format!(
                "max_backoff ({max_backoff:?}) must be >= initial_backoff ({initial_backoff:?})"
            )));
        }
        Ok(Self {
            initial_backoff,
            max_backoff,
            backoff_multiplier,
            max_attempts: None,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Backoff duration for the given 0-indexed attempt, or `None` if
    /// `max_attempts` has been exceeded.
    pub fn backoff_duration(&self, attempt: usize) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        Some(self.initial_backoff.mul_f64(multiplier).min(self.max_backoff))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Stateful backoff calculator: tracks the current attempt and resets after
/// a successful operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: usize,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the next backoff duration and advances the attempt counter.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let duration = self.policy.backoff_duration(self.attempt)?;
        self.attempt += 1;
        Some(duration)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth_capped_at_max() {
        let policy = BackoffPolicy::default();
        let mut backoff = Backoff::new(policy);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn max_attempts_exhausted() {
        let policy = BackoffPolicy::default().with_max_attempts(Some(2));
        let mut backoff = Backoff::new(policy);
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn rejects_invalid_multiplier() {
        assert!(BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0.5).is_err());
    }
}
