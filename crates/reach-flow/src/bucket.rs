//! Token-bucket admission control.

use chrono::{DateTime, Utc};
use reach_error::{ErrorCode, ReachError};
use std::sync::RwLock;

/// Tunables for [`TokenBucket`].
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens the bucket can hold.
    pub burst: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { rate: 10.0, burst: 20.0 }
    }
}

struct Inner {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

/// Admits calls at up to `rate` tokens/second, absorbing bursts up to
/// `burst`.
pub struct TokenBucket {
    config: TokenBucketConfig,
    inner: RwLock<Inner>,
}

impl TokenBucket {
    /// A full bucket at `now`.
    #[must_use]
    pub fn new(config: TokenBucketConfig, now: DateTime<Utc>) -> Self {
        let tokens = config.burst;
        Self { config, inner: RwLock::new(Inner { tokens, last_refill: now }) }
    }

    /// Refill for elapsed time, then take one token if available.
    ///
    /// # Errors
    /// [`ErrorCode::RateLimitExceeded`] if no tokens remain.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> Result<(), ReachError> {
        let mut inner = self.inner.write().expect("token bucket lock poisoned");

        let elapsed_secs = (now - inner.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        inner.tokens = (inner.tokens + elapsed_secs * self.config.rate).min(self.config.burst);
        inner.last_refill = now;

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            Ok(())
        } else {
            Err(ReachError::new(ErrorCode::RateLimitExceeded, "token bucket exhausted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset_millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + chrono::Duration::milliseconds(offset_millis)
    }

    #[test]
    fn admits_up_to_burst_then_rejects() {
        let bucket = TokenBucket::new(TokenBucketConfig { rate: 1.0, burst: 3.0 }, t(0));
        bucket.try_acquire(t(0)).unwrap();
        bucket.try_acquire(t(0)).unwrap();
        bucket.try_acquire(t(0)).unwrap();
        let err = bucket.try_acquire(t(0)).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(TokenBucketConfig { rate: 10.0, burst: 1.0 }, t(0));
        bucket.try_acquire(t(0)).unwrap();
        assert!(bucket.try_acquire(t(50)).is_err());
        bucket.try_acquire(t(200)).unwrap();
    }

    #[test]
    fn never_exceeds_burst_capacity() {
        let bucket = TokenBucket::new(TokenBucketConfig { rate: 100.0, burst: 2.0 }, t(0));
        bucket.try_acquire(t(10_000)).unwrap();
        bucket.try_acquire(t(10_000)).unwrap();
        assert!(bucket.try_acquire(t(10_000)).is_err());
    }
}
