//! Token-bucket rate limiter with an `Allow`/`GetStats`/`Stop` contract (§4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RateLimiterStats {
    pub allowed: u64,
    pub throttled: u64,
}

/// A single token bucket refilled at `rate` tokens per second, capped at
/// `burst` tokens. `Allow()` debits one token if available.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
    allowed: AtomicU64,
    throttled: AtomicU64,
    stopped: std::sync::atomic::AtomicBool,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub(crate) fn new(rate_per_sec: f64, burst: f64) -> Self {
        Self {
            rate_per_sec,
            burst,
            state: Mutex::new(BucketState { tokens: burst, last_refill: Instant::now() }),
            allowed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Returns `true` if a token was available and has been debited.
    pub(crate) fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        if self.stopped.load(Ordering::Relaxed) {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            self.allowed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub(crate) fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }

    /// Disables throttling: every subsequent `allow()` call returns `true`
    /// without debiting tokens. Used when a cluster's rate limit policy is
    /// removed by a later xDS update.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_is_exhausted_then_refills() {
        let limiter = RateLimiter::new(10.0, 2.0);
        assert!(limiter.allow_at(Instant::now()));
        assert!(limiter.allow_at(Instant::now()));
        assert!(!limiter.allow_at(Instant::now()));

        let later = Instant::now() + Duration::from_millis(200);
        assert!(limiter.allow_at(later));
    }

    #[test]
    fn stats_track_allowed_and_throttled() {
        let limiter = RateLimiter::new(0.0, 1.0);
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        assert!(!limiter.allow_at(now));
        let stats = limiter.get_stats();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.throttled, 1);
    }

    #[test]
    fn stop_disables_throttling() {
        let limiter = RateLimiter::new(0.0, 1.0);
        let now = Instant::now();
        assert!(limiter.allow_at(now));
        limiter.stop();
        assert!(limiter.allow_at(now));
        assert!(limiter.allow_at(now));
    }
}
