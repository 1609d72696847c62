//! Circuit breaker: four atomic counters with CAS-based acquire (§4.4).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::xds::model::CircuitBreakerLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Connections,
    PendingRequests,
    Requests,
    Retries,
}

#[derive(Debug, Default)]
struct Counter {
    current: AtomicU32,
    max: u32,
}

impl Counter {
    fn new(max: u32) -> Self {
        Self { current: AtomicU32::new(0), max }
    }

    /// `TryAcquire`: loop { c := load; if c >= max: return false; if CAS(c, c+1): return true }.
    /// A `max` of 0 means unlimited.
    fn try_acquire(&self) -> bool {
        if self.max == 0 {
            return true;
        }
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return false;
            }
            if self
                .current
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Atomic decrement, saturating at 0.
    fn release(&self) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1)));
    }
}

/// Per-cluster circuit breaker state.
#[derive(Debug)]
pub(crate) struct CircuitBreaker {
    connections: Counter,
    pending_requests: Counter,
    requests: Counter,
    retries: Counter,
    rejected: AtomicU64,
}

impl CircuitBreaker {
    pub(crate) fn new(limits: CircuitBreakerLimits) -> Self {
        Self {
            connections: Counter::new(limits.max_connections),
            pending_requests: Counter::new(limits.max_pending_requests),
            requests: Counter::new(limits.max_requests),
            retries: Counter::new(limits.max_retries),
            rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn try_acquire(&self, kind: TokenKind) -> bool {
        let counter = self.counter(kind);
        let acquired = counter.try_acquire();
        if !acquired {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    pub(crate) fn release(&self, kind: TokenKind) {
        self.counter(kind).release();
    }

    pub(crate) fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn counter(&self, kind: TokenKind) -> &Counter {
        match kind {
            TokenKind::Connections => &self.connections,
            TokenKind::PendingRequests => &self.pending_requests,
            TokenKind::Requests => &self.requests,
            TokenKind::Retries => &self.retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_is_unlimited() {
        let cb = CircuitBreaker::new(CircuitBreakerLimits::default());
        for _ in 0..1000 {
            assert!(cb.try_acquire(TokenKind::Requests));
        }
    }

    #[test]
    fn bounded_limit_rejects_past_max() {
        let cb = CircuitBreaker::new(CircuitBreakerLimits { max_requests: 2, ..Default::default() });
        assert!(cb.try_acquire(TokenKind::Requests));
        assert!(cb.try_acquire(TokenKind::Requests));
        assert!(!cb.try_acquire(TokenKind::Requests));
        assert_eq!(cb.rejected_count(), 1);

        cb.release(TokenKind::Requests);
        assert!(cb.try_acquire(TokenKind::Requests));
    }

    #[test]
    fn release_saturates_at_zero() {
        let cb = CircuitBreaker::new(CircuitBreakerLimits { max_requests: 1, ..Default::default() });
        cb.release(TokenKind::Requests);
        cb.release(TokenKind::Requests);
        assert!(cb.try_acquire(TokenKind::Requests));
    }
}
