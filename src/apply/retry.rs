//! Retry loop for provider calls.
//!
//! Transient provider errors are retried with exponential backoff, capped
//! at the configured ceiling. A provider-supplied `retry_after` hint
//! overrides the computed delay. Fatal errors are never retried.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ApplyConfig;
use crate::error::{ApplyError, Result, StratusError};

/// Backoff parameters derived from the apply configuration.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per call, first try included.
    max_attempts: u32,
    /// Delay before the first retry.
    base_delay: Duration,
    /// Ceiling on any computed delay.
    max_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from the apply configuration.
    #[must_use]
    pub const fn from_config(config: &ApplyConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }

    /// Delay before the retry following attempt `attempt` (1-based).
    ///
    /// Doubles per attempt: base, base*2, base*4, ... capped at the
    /// ceiling. A provider hint replaces the computed value but is still
    /// capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = hint.unwrap_or_else(|| {
            let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
            self.base_delay.saturating_mul(factor)
        });
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// Returns the value together with the number of retries performed
    /// (0 when the first attempt succeeded).
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Cancelled`] if the cancel signal fires while
    /// backing off, [`ApplyError::MaxRetriesExceeded`] when every attempt
    /// failed transiently, and the provider error unchanged when it is
    /// not retryable.
    pub async fn run<T, F, Fut>(
        &self,
        resource: &str,
        cancel: &mut watch::Receiver<bool>,
        mut op: F,
    ) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            if *cancel.borrow() {
                return Err(StratusError::Apply(ApplyError::Cancelled));
            }

            match op().await {
                Ok(value) => return Ok((value, attempt - 1)),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, err.retry_delay());
                    warn!(
                        resource,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient provider error, retrying: {err}"
                    );
                    tokio::select! {
                        () = sleep(delay) => {}
                        changed = cancel.changed() => {
                            if changed.is_err() || *cancel.borrow() {
                                return Err(StratusError::Apply(ApplyError::Cancelled));
                            }
                        }
                    }
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    debug!(resource, attempt, "Retries exhausted");
                    return Err(StratusError::Apply(ApplyError::MaxRetriesExceeded {
                        attempts: attempt,
                        resource: resource.to_string(),
                        last_error: err.to_string(),
                    }));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::outputs::cancel_channel;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, None), Duration::from_millis(250));
    }

    #[test]
    fn provider_hint_overrides_computed_delay() {
        let policy = policy();
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(5))),
            Duration::from_millis(5)
        );
        // Hints are still capped.
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(60))),
            Duration::from_millis(10)
        );
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_with_two_retries() {
        let calls = AtomicU32::new(0);
        let (_tx, mut rx) = cancel_channel();

        let (value, retries) = policy()
            .run("pod", &mut rx, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(StratusError::Provider(ProviderError::transient("busy")))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transient_exhaustion_reports_attempts() {
        let (_tx, mut rx) = cancel_channel();

        let result: Result<((), u32)> = policy()
            .run("pod", &mut rx, || async {
                Err(StratusError::Provider(ProviderError::transient("busy")))
            })
            .await;

        match result {
            Err(StratusError::Apply(ApplyError::MaxRetriesExceeded {
                attempts, resource, ..
            })) => {
                assert_eq!(attempts, 3);
                assert_eq!(resource, "pod");
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let (_tx, mut rx) = cancel_channel();

        let result: Result<((), u32)> = policy()
            .run("pod", &mut rx, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StratusError::Provider(ProviderError::fatal("quota"))) }
            })
            .await;

        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let (tx, mut rx) = cancel_channel();
        tx.send_replace(true);

        let result: Result<((), u32)> = policy()
            .run("pod", &mut rx, || async {
                Err(StratusError::Provider(ProviderError::transient("busy")))
            })
            .await;

        assert!(matches!(
            result,
            Err(StratusError::Apply(ApplyError::Cancelled))
        ));
    }
}
