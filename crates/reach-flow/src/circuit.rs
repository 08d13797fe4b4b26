//! Three-state circuit breaker: closed, open, half-open.

use chrono::{DateTime, Duration, Utc};
use reach_error::{ErrorCode, ReachError};
use std::sync::RwLock;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through; failures accumulate toward `failure_threshold`.
    Closed,
    /// Requests are rejected until `open_timeout` elapses.
    Open,
    /// A limited number of probe requests are allowed through to test recovery.
    HalfOpen,
}

/// Tunables for [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing, in seconds.
    pub open_timeout_secs: i64,
    /// Concurrent probes allowed while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_timeout_secs: 30, half_open_max_probes: 1 }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    half_open_probes_in_flight: u32,
}

/// Gates calls based on recent success/failure history.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    /// A closed breaker with the given config.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner { state: CircuitState::Closed, consecutive_failures: 0, opened_at: None, half_open_probes_in_flight: 0 }),
        }
    }

    /// Current state, without mutating it (an open circuit past its
    /// timeout still reports `Open` here; [`Self::allow`] performs the
    /// actual transition).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.read().expect("circuit breaker lock poisoned").state
    }

    /// Decide whether a call may proceed at `now`, transitioning
    /// open -> half-open once the timeout has elapsed.
    ///
    /// # Errors
    /// [`ErrorCode::CircuitOpen`] if the circuit is open, or half-open with
    /// no remaining probe budget.
    pub fn allow(&self, now: DateTime<Utc>) -> Result<(), ReachError> {
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");

        if inner.state == CircuitState::Open {
            let reopen_elapsed = inner.opened_at.is_some_and(|at| now - at >= Duration::seconds(self.config.open_timeout_secs));
            if reopen_elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_probes_in_flight = 0;
            } else {
                return Err(ReachError::new(ErrorCode::CircuitOpen, "circuit breaker is open"));
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.half_open_probes_in_flight >= self.config.half_open_max_probes {
                    Err(ReachError::new(ErrorCode::CircuitOpen, "half-open probe budget exhausted"))
                } else {
                    inner.half_open_probes_in_flight += 1;
                    Ok(())
                }
            }
            CircuitState::Open => unreachable!("transitioned out of Open above"),
        }
    }

    /// Record a successful call: closes the circuit and resets counters.
    pub fn on_success(&self) {
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_probes_in_flight = 0;
    }

    /// Record a failed call: accumulates toward the open threshold while
    /// closed, or immediately reopens a half-open probe's failure.
    pub fn on_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.half_open_probes_in_flight = 0;
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap()
    }

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 2, ..Default::default() });
        breaker.allow(t(0)).unwrap();
        breaker.on_failure(t(0));
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_failure(t(1));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.allow(t(2)).unwrap_err().code, ErrorCode::CircuitOpen);
    }

    #[test]
    fn open_transitions_to_half_open_after_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, open_timeout_secs: 10, ..Default::default() });
        breaker.on_failure(t(0));
        assert!(breaker.allow(t(5)).is_err());
        breaker.allow(t(11)).unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_probe_budget_is_limited() {
        let breaker =
            CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, open_timeout_secs: 10, half_open_max_probes: 1 });
        breaker.on_failure(t(0));
        breaker.allow(t(11)).unwrap();
        let err = breaker.allow(t(11)).unwrap_err();
        assert_eq!(err.code, ErrorCode::CircuitOpen);
    }

    #[test]
    fn half_open_probe_success_closes_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, open_timeout_secs: 10, ..Default::default() });
        breaker.on_failure(t(0));
        breaker.allow(t(11)).unwrap();
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, open_timeout_secs: 10, ..Default::default() });
        breaker.on_failure(t(0));
        breaker.allow(t(11)).unwrap();
        breaker.on_failure(t(11));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow(t(12)).is_err());
    }
}
