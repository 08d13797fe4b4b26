// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-flow
//!
//! Composite flow control for outgoing calls (delegation, transport sends):
//! a circuit breaker gates on recent failures, a token bucket gates on
//! sustained rate, and a counting semaphore gates on concurrency — checked
//! in that order, per spec.md §4.17. A standalone retry helper implements
//! capped exponential backoff with jitter derived deterministically from
//! the attempt index, so retry timing is reproducible across runs.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
mod circuit;
mod gate;
mod retry;

pub use bucket::{TokenBucket, TokenBucketConfig};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use gate::{FlowGate, FlowGateConfig, FlowPermit};
pub use retry::{compute_delay, retry_async, retry_reach, RetryConfig};
