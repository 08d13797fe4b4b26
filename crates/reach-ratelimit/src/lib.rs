// SPDX-License-Identifier: MIT OR Apache-2.0
//! reach-ratelimit
//!
//! Per-node and global sliding-window admission control, a concurrency
//! bound, and cascade-loop detection with cooldown, per spec.md §4.13.
//! Checks run in a fixed order; timestamps are recorded only once every
//! check in the chain has passed.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Duration, Utc};
use reach_core::NodeId;
use reach_error::{ErrorCode, ReachError};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Tunable limits for one [`MeshRateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Max requests per node within `per_node_window`.
    pub per_node_limit: u32,
    /// Per-node sliding window, in seconds.
    pub per_node_window_secs: i64,
    /// Max requests mesh-wide within `global_window`.
    pub global_limit: u32,
    /// Global sliding window, in seconds.
    pub global_window_secs: i64,
    /// Max concurrently in-flight tasks, mesh-wide.
    pub concurrency_limit: u32,
    /// Requests within `cascade_window` that trip cooldown.
    pub cascade_threshold: u32,
    /// Cascade detection window, in seconds.
    pub cascade_window_secs: i64,
    /// How long a node stays in cooldown once tripped, in seconds.
    pub cooldown_secs: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            per_node_limit: 60,
            per_node_window_secs: 60,
            global_limit: 300,
            global_window_secs: 60,
            concurrency_limit: 10,
            cascade_threshold: 15,
            cascade_window_secs: 30,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    per_node: HashMap<NodeId, VecDeque<DateTime<Utc>>>,
    global: VecDeque<DateTime<Utc>>,
    cascade: HashMap<NodeId, VecDeque<DateTime<Utc>>>,
    cooldowns: HashMap<NodeId, DateTime<Utc>>,
    active_concurrency: u32,
}

fn prune(deque: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    while let Some(front) = deque.front() {
        if now - *front > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

/// Mesh-wide admission gate: per-node and global sliding windows, a
/// concurrency bound, and cascade detection with cooldown.
pub struct MeshRateLimiter {
    config: RateLimiterConfig,
    state: RwLock<State>,
}

impl MeshRateLimiter {
    /// A limiter with the given config.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, state: RwLock::new(State::default()) }
    }

    /// Check admission for a request from `node_id` at `now`, per
    /// spec.md §4.13's check order: cooldown, per-node, global,
    /// concurrency, cascade. Records timestamps only if every check
    /// passes.
    ///
    /// # Errors
    /// [`ErrorCode::RateLimitExceeded`] for cooldown, per-node, global, or
    /// cascade rejection; [`ErrorCode::ResourceExhausted`] if the
    /// concurrency bound is reached.
    pub fn admit(&self, node_id: &NodeId, now: DateTime<Utc>) -> Result<(), ReachError> {
        let mut state = self.state.write().expect("rate limiter lock poisoned");

        if let Some(expiry) = state.cooldowns.get(node_id) {
            if now < *expiry {
                return Err(ReachError::new(ErrorCode::RateLimitExceeded, "node is in cascade cooldown"));
            }
        }
        state.cooldowns.retain(|_, expiry| now < *expiry);

        let per_node_window = Duration::seconds(self.config.per_node_window_secs);
        let per_node_deque = state.per_node.entry(node_id.clone()).or_default();
        prune(per_node_deque, per_node_window, now);
        if per_node_deque.len() as u32 >= self.config.per_node_limit {
            return Err(ReachError::new(ErrorCode::RateLimitExceeded, "per-node rate limit exceeded"));
        }

        let global_window = Duration::seconds(self.config.global_window_secs);
        prune(&mut state.global, global_window, now);
        if state.global.len() as u32 >= self.config.global_limit {
            return Err(ReachError::new(ErrorCode::RateLimitExceeded, "global rate limit exceeded"));
        }

        if state.active_concurrency >= self.config.concurrency_limit {
            return Err(ReachError::new(ErrorCode::ResourceExhausted, "concurrency limit exceeded"));
        }

        let cascade_window = Duration::seconds(self.config.cascade_window_secs);
        let cascade_deque = state.cascade.entry(node_id.clone()).or_default();
        prune(cascade_deque, cascade_window, now);
        if cascade_deque.len() as u32 + 1 >= self.config.cascade_threshold {
            let cooldown_until = now + Duration::seconds(self.config.cooldown_secs);
            state.cooldowns.insert(node_id.clone(), cooldown_until);
            tracing::warn!(%node_id, "cascade threshold reached, entering cooldown");
            return Err(ReachError::new(ErrorCode::RateLimitExceeded, "cascade threshold exceeded"));
        }

        state.per_node.get_mut(node_id).expect("inserted above").push_back(now);
        state.global.push_back(now);
        state.cascade.get_mut(node_id).expect("inserted above").push_back(now);
        state.active_concurrency += 1;
        Ok(())
    }

    /// Release one concurrency slot once the admitted task has finished.
    pub fn release(&self) {
        let mut state = self.state.write().expect("rate limiter lock poisoned");
        state.active_concurrency = state.active_concurrency.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn per_node_limit_enforced_independently_of_other_nodes() {
        let limiter = MeshRateLimiter::new(RateLimiterConfig { per_node_limit: 2, cascade_threshold: 100, ..Default::default() });
        let a = NodeId::from_string("a");
        let b = NodeId::from_string("b");
        limiter.admit(&a, t(0)).unwrap();
        limiter.admit(&a, t(1)).unwrap();
        assert_eq!(limiter.admit(&a, t(2)).unwrap_err().code, ErrorCode::RateLimitExceeded);
        limiter.admit(&b, t(2)).unwrap();
    }

    #[test]
    fn global_limit_enforced_across_nodes() {
        let limiter = MeshRateLimiter::new(RateLimiterConfig {
            per_node_limit: 100,
            global_limit: 2,
            cascade_threshold: 100,
            ..Default::default()
        });
        let a = NodeId::from_string("a");
        let b = NodeId::from_string("b");
        limiter.admit(&a, t(0)).unwrap();
        limiter.admit(&b, t(1)).unwrap();
        assert_eq!(limiter.admit(&a, t(2)).unwrap_err().code, ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn concurrency_limit_enforced_and_released() {
        let limiter = MeshRateLimiter::new(RateLimiterConfig {
            per_node_limit: 100,
            global_limit: 100,
            concurrency_limit: 1,
            cascade_threshold: 100,
            ..Default::default()
        });
        let a = NodeId::from_string("a");
        limiter.admit(&a, t(0)).unwrap();
        assert_eq!(limiter.admit(&a, t(1)).unwrap_err().code, ErrorCode::ResourceExhausted);
        limiter.release();
        limiter.admit(&a, t(2)).unwrap();
    }

    #[test]
    fn cascade_triggers_cooldown_that_outlives_cascade_window() {
        let limiter = MeshRateLimiter::new(RateLimiterConfig {
            per_node_limit: 1000,
            global_limit: 1000,
            concurrency_limit: 1000,
            cascade_threshold: 3,
            cascade_window_secs: 30,
            cooldown_secs: 60,
            ..Default::default()
        });
        let a = NodeId::from_string("a");
        limiter.admit(&a, t(0)).unwrap();
        limiter.admit(&a, t(1)).unwrap();
        // Third request within the cascade window trips the threshold.
        let err = limiter.admit(&a, t(2)).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);

        // Still rejected even after the cascade window itself has elapsed,
        // because cooldown (60s) outlasts it.
        let err2 = limiter.admit(&a, t(40)).unwrap_err();
        assert_eq!(err2.code, ErrorCode::RateLimitExceeded);

        // Cooldown has expired by t(63).
        limiter.admit(&a, t(63)).unwrap();
    }

    #[test]
    fn cooldown_checked_before_other_limits() {
        let limiter = MeshRateLimiter::new(RateLimiterConfig {
            per_node_limit: 1,
            cascade_threshold: 100,
            cooldown_secs: 30,
            ..Default::default()
        });
        let a = NodeId::from_string("a");
        limiter.admit(&a, t(0)).unwrap();
        // Exhausts per-node limit; next call fails on per-node, not cooldown.
        let err = limiter.admit(&a, t(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    }
}
