//! Capped exponential backoff with jitter derived from the attempt index.

use reach_error::ReachError;
use std::future::Future;
use std::time::Duration;

/// Tunables for [`retry_async`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Delay ceiling, in milliseconds.
    pub max_delay_ms: u64,
    /// Width of the jitter window added to the nominal delay, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 100, max_delay_ms: 10_000, jitter_ms: 50 }
    }
}

/// A fixed multiplicative hash constant (Knuth), used only to spread jitter
/// deterministically across attempt indices — not a source of randomness.
const JITTER_MIX: u64 = 2_654_435_761;

/// Delay before retrying `attempt` (0-based), exponential in `attempt` and
/// capped at `max_delay_ms`, plus a jitter term that is a pure function of
/// `attempt` so the sequence is reproducible across runs.
#[must_use]
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = 2u64.saturating_pow(attempt);
    let nominal = config.base_delay_ms.saturating_mul(exponent).min(config.max_delay_ms);
    let jitter = if config.jitter_ms == 0 { 0 } else { (u64::from(attempt).wrapping_mul(JITTER_MIX)) % config.jitter_ms };
    Duration::from_millis(nominal.saturating_add(jitter).min(config.max_delay_ms.saturating_add(config.jitter_ms)))
}

/// Retry `op` under `config`, sleeping between attempts per [`compute_delay`].
/// Aborts immediately, without sleeping, if the error is not retryable or the
/// attempt budget is exhausted.
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, is_retryable: impl Fn(&E) -> bool, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= config.max_attempts || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = compute_delay(config, attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Retry helper specialized for [`ReachError`], using its `retryable` flag.
pub async fn retry_reach<T, F, Fut>(config: &RetryConfig, op: F) -> Result<T, ReachError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReachError>>,
{
    retry_async(config, |e: &ReachError| e.retryable, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn compute_delay_grows_and_caps() {
        let config = RetryConfig { max_attempts: 10, base_delay_ms: 100, max_delay_ms: 1_000, jitter_ms: 0 };
        assert_eq!(compute_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(compute_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(compute_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(compute_delay(&config, 10), Duration::from_millis(1_000));
    }

    #[test]
    fn compute_delay_is_deterministic_for_same_attempt() {
        let config = RetryConfig::default();
        assert_eq!(compute_delay(&config, 3), compute_delay(&config, 3));
    }

    #[tokio::test]
    async fn retry_async_succeeds_after_transient_failures() {
        let config = RetryConfig { max_attempts: 5, base_delay_ms: 1, max_delay_ms: 5, jitter_ms: 0 };
        let attempts = AtomicU32::new(0);
        let result = retry_reach(&config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ReachError::new(ErrorCode::Timeout, "transient").with_retryable(true))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_async_aborts_immediately_for_non_retryable_error() {
        let config = RetryConfig { max_attempts: 5, base_delay_ms: 50, max_delay_ms: 500, jitter_ms: 0 };
        let attempts = AtomicU32::new(0);
        let result: Result<(), ReachError> = retry_reach(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ReachError::new(ErrorCode::PermissionDenied, "denied").with_retryable(false)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_async_gives_up_after_max_attempts() {
        let config = RetryConfig { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 2, jitter_ms: 0 };
        let attempts = AtomicU32::new(0);
        let result: Result<(), ReachError> = retry_reach(&config, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ReachError::new(ErrorCode::Timeout, "still failing").with_retryable(true)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
