//! Bounded exponential backoff and per-call timeouts for external collaborators.

use crate::error::{FuseError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to each attempt separately.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self { Self { max_attempts: 1, ..Self::default() } }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}

/// Run `op` under `service`'s timeout, retrying retryable failures with doubling delays.
pub async fn with_retry<T, F, Fut>(service: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(FuseError::Timeout { service: service.to_string(), elapsed: policy.call_timeout }),
        };
        match outcome {
            Ok(v) => {
                if attempt > 1 { tracing::info!(service, attempt, "call succeeded after retry"); }
                return Ok(v);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts.max(1) => {
                tracing::warn!(service, attempt, max_attempts = policy.max_attempts, ?delay, error = %e, "call failed, retrying");
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(e) => {
                tracing::warn!(service, attempt, error = %e, "giving up");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(2), call_timeout: Duration::from_secs(5) }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let got = with_retry("judge", &fast(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(FuseError::external("judge", "503")) } else { Ok("done") }
        })
        .await;
        assert_eq!(got.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let got: Result<()> = with_retry("judge", &fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FuseError::external("judge", "connection reset"))
        })
        .await;
        assert!(matches!(got, Err(FuseError::ExternalCollaborator { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let got: Result<()> = with_retry("judge", &fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FuseError::Config("no key".into()))
        })
        .await;
        assert!(got.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let policy = RetryPolicy::no_retry().with_timeout(Duration::from_millis(50));
        let got: Result<()> = with_retry("wiki", &policy, || async {
            sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(got, Err(FuseError::Timeout { .. })));
    }
}
