//! Composite flow-control gate: circuit breaker, then token bucket, then a
//! counting semaphore, in that order.

use crate::bucket::{TokenBucket, TokenBucketConfig};
use crate::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use chrono::{DateTime, Utc};
use reach_autonomy::CancellationToken;
use reach_error::{ErrorCode, ReachError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Tunables for [`FlowGate`].
#[derive(Debug, Clone)]
pub struct FlowGateConfig {
    /// Circuit breaker tunables.
    pub circuit: CircuitBreakerConfig,
    /// Token bucket tunables.
    pub bucket: TokenBucketConfig,
    /// Maximum number of calls admitted concurrently.
    pub concurrency_limit: usize,
}

impl Default for FlowGateConfig {
    fn default() -> Self {
        Self { circuit: CircuitBreakerConfig::default(), bucket: TokenBucketConfig::default(), concurrency_limit: 16 }
    }
}

/// A held slot through the gate. Dropping it releases the concurrency slot;
/// call [`FlowGate::on_success`]/[`FlowGate::on_failure`] to report the
/// call's outcome to the circuit breaker.
pub struct FlowPermit {
    _permit: OwnedSemaphorePermit,
}

/// Admits a call only if the circuit is closed (or probing), a token is
/// available, and a concurrency slot is free.
pub struct FlowGate {
    circuit: CircuitBreaker,
    bucket: TokenBucket,
    semaphore: Arc<Semaphore>,
}

impl FlowGate {
    /// A new gate, with a full token bucket and a closed circuit at `now`.
    #[must_use]
    pub fn new(config: FlowGateConfig, now: DateTime<Utc>) -> Self {
        Self {
            circuit: CircuitBreaker::new(config.circuit),
            bucket: TokenBucket::new(config.bucket, now),
            semaphore: Arc::new(Semaphore::new(config.concurrency_limit)),
        }
    }

    /// Acquire a slot, checking circuit breaker and token bucket first
    /// (cheap, synchronous) before waiting on the semaphore. The semaphore
    /// wait honors `cancel`.
    ///
    /// # Errors
    /// [`ErrorCode::CircuitOpen`] or [`ErrorCode::RateLimitExceeded`] from
    /// the earlier stages; [`ErrorCode::Cancelled`] if `cancel` fires while
    /// waiting for a concurrency slot.
    pub async fn acquire(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<FlowPermit, ReachError> {
        self.circuit.allow(now)?;
        self.bucket.try_acquire(now)?;

        let semaphore = self.semaphore.clone();
        tokio::select! {
            res = semaphore.acquire_owned() => {
                let permit = res.map_err(|_| ReachError::new(ErrorCode::Internal, "flow gate semaphore closed"))?;
                Ok(FlowPermit { _permit: permit })
            }
            () = cancel.cancelled() => Err(ReachError::new(ErrorCode::Cancelled, "flow gate acquire cancelled")),
        }
    }

    /// Report a successful call, closing the circuit breaker.
    pub fn on_success(&self) {
        self.circuit.on_success();
    }

    /// Report a failed call, counting it toward the circuit breaker's
    /// open threshold.
    pub fn on_failure(&self, now: DateTime<Utc>) {
        self.circuit.on_failure(now);
    }

    /// The circuit breaker's current state, for status reporting.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }
}
