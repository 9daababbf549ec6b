//! Retry with exponential backoff.
//!
//! Wraps fallible async operations whose failures may be transient (object
//! storage timeouts, network blips). The caller supplies a classifier that
//! decides, from the error's tagged kind, whether another attempt is worth
//! making. Failures are reported, never raised, so callers can render
//! partial results ("3/5 pages uploaded").

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Backoff parameters. Total attempts = `max_retries + 1`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

/// Final state of a retried operation. `result` carries the value or the
/// last error observed; `attempts` counts every invocation including the
/// first.
#[derive(Debug)]
pub struct RetryReport<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// True when the caller's cancel channel fired during a backoff sleep.
    pub cancelled: bool,
}

impl<T, E> RetryReport<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Execute `operation` with exponential backoff.
///
/// `is_retryable` inspects the error's kind: terminal errors (validation,
/// permanent storage misconfiguration) end the loop on the first failure,
/// transient ones are retried until `policy.max_retries` is spent.
///
/// `cancel` is observed while sleeping between attempts; the receiver
/// resolving (a send or the sender being dropped by an abandoned request)
/// stops the loop early with the last error and `cancelled = true`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
    mut cancel: Option<watch::Receiver<()>>,
    operation_name: &str,
) -> RetryReport<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut delay = policy.initial_delay;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(operation = operation_name, attempts, "succeeded after retry");
                }
                return RetryReport {
                    result: Ok(value),
                    attempts,
                    cancelled: false,
                };
            }
            Err(err) => {
                if attempts >= max_attempts || !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        max_attempts,
                        error = %err,
                        "operation failed permanently"
                    );
                    return RetryReport {
                        result: Err(err),
                        attempts,
                        cancelled: false,
                    };
                }

                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );

                if let Some(rx) = cancel.as_mut() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = rx.changed() => {
                            info!(operation = operation_name, attempts, "retry cancelled");
                            return RetryReport {
                                result: Err(err),
                                attempts,
                                cancelled: true,
                            };
                        }
                    }
                } else {
                    tokio::time::sleep(delay).await;
                }

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("bad input")]
        Validation,
        #[error("connection reset")]
        Network,
    }

    fn retryable(err: &TestError) -> bool {
        matches!(err, TestError::Network)
    }

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let report = retry_with_backoff(
            &quick_policy(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Validation) }
            },
            retryable,
            None,
            "test",
        )
        .await;

        assert!(!report.is_success());
        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_then_success() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let report = retry_with_backoff(
            &quick_policy(3),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError::Network)
                    } else {
                        Ok(n)
                    }
                }
            },
            retryable,
            None,
            "test",
        )
        .await;

        assert!(report.is_success());
        assert_eq!(report.attempts, 3);
        // Slept 1000ms after the first failure, 2000ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_last_error_and_attempt_count() {
        let report = retry_with_backoff(
            &quick_policy(2),
            || async { Err::<(), _>(TestError::Network) },
            retryable,
            None,
            "test",
        )
        .await;

        assert!(!report.is_success());
        assert_eq!(report.attempts, 3);
        assert!(matches!(report.result, Err(TestError::Network)));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 4,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1500),
            backoff_multiplier: 10.0,
        };
        let started = tokio::time::Instant::now();
        let report = retry_with_backoff(
            &policy,
            || async { Err::<(), _>(TestError::Network) },
            retryable,
            None,
            "test",
        )
        .await;

        assert_eq!(report.attempts, 5);
        // 1000 + 1500 * 3, not 1000 + 10_000 + ...
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(5500));
        assert!(elapsed < Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cancel_sender_stops_backoff() {
        let (tx, rx) = watch::channel(());
        drop(tx);

        let report = retry_with_backoff(
            &quick_policy(3),
            || async { Err::<(), _>(TestError::Network) },
            retryable,
            Some(rx),
            "test",
        )
        .await;

        assert!(report.cancelled);
        assert_eq!(report.attempts, 1);
        assert!(matches!(report.result, Err(TestError::Network)));
    }
}
