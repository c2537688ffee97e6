use crate::config::CoordinatorConfig;
use crate::errors::MutationResult;
use crate::observability::mutation_metrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry for lost-update races
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for RetryPolicy {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.retry_backoff_millis),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff with up to half a step of random jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.saturating_mul(attempt);
        let jitter_cap = self.base_backoff.as_millis() as u64 / 2;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. Only `StaleWriteConflict` is retried.
pub async fn retry_on_stale<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> MutationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MutationResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_number = 1;
    loop {
        match attempt().await {
            Err(e) if e.is_retryable() && attempt_number < max_attempts => {
                let delay = policy.backoff(attempt_number);
                mutation_metrics().record_retry();
                warn!(
                    operation = operation,
                    attempt = attempt_number,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Lost update detected, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt_number += 1;
            }
            outcome => return outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MutationError;
    use crate::tasks::TaskId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_writes_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_stale(&policy(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MutationError::StaleWriteConflict { current: 1, supplied: 0 })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: MutationResult<()> = retry_on_stale(&policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MutationError::StaleWriteConflict { current: 1, supplied: 0 })
        })
        .await;

        assert!(matches!(result, Err(MutationError::StaleWriteConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: MutationResult<()> = retry_on_stale(&policy(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MutationError::ConcurrentEditConflict { task_id: TaskId(1) })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        let policy = policy();
        assert!(policy.backoff(1) >= Duration::from_millis(10));
        assert!(policy.backoff(1) <= Duration::from_millis(15));
        assert!(policy.backoff(3) >= Duration::from_millis(30));
    }
}
