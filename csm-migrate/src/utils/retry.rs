//! Store Call Retry Logic
//!
//! Exponential backoff for transient store failures (rate limiting, network
//! errors, 5xx). Anything else is returned to the caller on the first attempt.

use crate::error::StoreError;
use csm_common::config::PacingConfig;
use std::time::{Duration, Instant};

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_pacing(pacing: &PacingConfig) -> Self {
        Self {
            max_attempts: pacing.retry_max_attempts.max(1),
            initial_delay: Duration::from_millis(pacing.retry_initial_delay_ms),
            max_delay: Duration::from_millis(pacing.retry_max_delay_ms),
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_pacing(&PacingConfig::default())
    }
}

/// Retry a store operation with exponential backoff until attempts run out.
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. If successful, return result
/// 3. If the error is transient and attempts remain: log WARN, backoff, retry
/// 4. Otherwise return the error
///
/// Backoff starts at `initial_delay`, doubles each attempt, capped at `max_delay`.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "create hero_banner", "asset status")
/// * `policy` - Attempt limit and delays
/// * `operation` - Async closure that performs the store call
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let start_time = Instant::now();
    let mut attempt = 0;
    let mut backoff = policy.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient store failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_delay);
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Store operation failed: retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_transient("test_op", &quick(3), || async { Ok::<i32, StoreError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_rate_limiting() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient("test_op", &quick(5), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(StoreError::RateLimited)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient("test_op", &quick(4), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(StoreError::Network("reset".into())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result = retry_transient("test_op", &quick(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(StoreError::Validation("title".into())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_pacing_never_zero_attempts() {
        let mut pacing = PacingConfig::default();
        pacing.retry_max_attempts = 0;
        assert_eq!(RetryPolicy::from_pacing(&pacing).max_attempts, 1);
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
