use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::resilience::RandomSource;

/// Exponential backoff policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Wraps a single call with bounded exponential-backoff retry.
///
/// Only transient failure classes (timeouts, 5xx-equivalent, network errors)
/// are retried; auth and validation failures propagate immediately so the
/// layers that own those policies can react.
pub struct RetryExecutor {
    policy: RetryPolicy,
    jitter: Option<Arc<dyn RandomSource>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: None,
        }
    }

    /// Enables up to ±25% jitter on each backoff delay.
    pub fn with_jitter(mut self, source: Arc<dyn RandomSource>) -> Self {
        self.jitter = Some(source);
        self
    }

    /// Runs `op`, retrying transient failures up to the attempt budget.
    pub async fn run<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(AppError::RetryExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delay before the attempt following `attempt` (1-based): doubles from
    /// the base, capped, with optional jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .policy
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt - 1));
        let capped = exp.min(self.policy.max_delay);

        match &self.jitter {
            Some(source) => {
                let factor = 0.75 + source.sample() * 0.5;
                capped.mul_f64(factor)
            }
            None => capped,
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::test_support::FixedRandom;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(4),
            max_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_attempt() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(7)
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AppError::Transient("503".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_retry_exhausted() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Transient("timeout".to_string()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(AppError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_not_retried() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::AuthExpired)
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AppError::AuthExpired)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_not_retried() {
        let executor = RetryExecutor::new(quick_policy(3));
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = executor
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::UpstreamValidation("bad seeds".to_string()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AppError::UpstreamValidation(_))));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        });
        assert_eq!(executor.delay_for(1), Duration::from_secs(4));
        assert_eq!(executor.delay_for(2), Duration::from_secs(8));
        assert_eq!(executor.delay_for(3), Duration::from_secs(10));
        assert_eq!(executor.delay_for(4), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        })
        .with_jitter(Arc::new(FixedRandom::new(vec![0.0, 1.0, 0.5])));

        assert_eq!(executor.delay_for(1), Duration::from_secs(4).mul_f64(0.75));
        assert_eq!(executor.delay_for(1), Duration::from_secs(4).mul_f64(1.25));
        assert_eq!(executor.delay_for(1), Duration::from_secs(4));
    }
}
