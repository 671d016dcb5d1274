//! Bounded retry for flaky in-attempt operations (uploads, mostly).

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Retry behavior for one operation class.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial try
    pub max_retries: u32,
    /// Base delay, doubled per retry
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
    /// Name for logging
    pub operation: &'static str,
}

impl RetryPolicy {
    pub fn new(operation: &'static str, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            operation,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retry budget is spent, backing
/// off exponentially between tries. `should_retry` gates which errors are
/// worth another try.
pub async fn with_retries<F, Fut, T, E>(
    policy: &RetryPolicy,
    should_retry: impl Fn(&E) -> bool,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retry < policy.max_retries && should_retry(&e) => {
                let delay = policy.delay_for(retry);
                retry += 1;
                debug!(
                    "{} failed (retry {}/{}), backing off {:?}: {}",
                    policy.operation, retry, policy.max_retries, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            operation: "test",
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(&fast(3), |_: &String| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_is_enforced() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retries(&fast(3), |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4); // initial + 3 retries
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retries(&fast(3), |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("terminal".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = fast(5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2));
        assert_eq!(policy.delay_for(10), Duration::from_millis(4));
    }
}
