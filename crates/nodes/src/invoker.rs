//! Bounded retry around completion calls.
//!
//! [`ResilientInvoker`] runs an operation under a [`RetryPolicy`], sleeping
//! between attempts with `tokio::time::sleep` so that waiting never blocks
//! other requests. An optional deadline bounds every attempt and every
//! back-off; an attempt still in flight when it passes is dropped.

use std::future::Future;
use std::time::Duration;

use pipeline::{CompletionError, ErrorClassification, RetryPolicy};
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, warn};

/// Successful result of an invocation plus what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoked<T> {
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Time spent across attempts and back-off.
    pub elapsed: Duration,
}

/// Why an invocation gave up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    /// The failure was not retryable under the policy. No further attempt
    /// was made.
    #[error("Call refused after {attempts} attempt(s) ({classification}): {error}")]
    Rejected {
        attempts: u32,
        classification: ErrorClassification,
        error: CompletionError,
    },

    /// Every attempt failed with a retryable error.
    #[error("Service unavailable after {attempts} attempt(s) in {}ms: {last}", .elapsed.as_millis())]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        /// The error of the final attempt.
        last: CompletionError,
    },

    /// The deadline passed during an attempt or would pass during back-off.
    #[error("Deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32, elapsed: Duration },
}

impl InvokeError {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            InvokeError::Rejected { attempts, .. }
            | InvokeError::Exhausted { attempts, .. }
            | InvokeError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}

/// Runs completion calls under a caller-supplied retry policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResilientInvoker;

impl ResilientInvoker {
    /// Calls `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of the attempts `policy` allows, or runs out of time.
    ///
    /// `operation` receives the 1-based attempt number. A server-supplied
    /// retry hint raises the scheduled back-off to at least the hint.
    pub async fn invoke<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<Invoked<T>, InvokeError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CompletionError>>,
    {
        let started = Instant::now();
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match deadline {
                Some(deadline) => match timeout_at(deadline, operation(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(attempt, "Deadline passed while a call was in flight");
                        return Err(InvokeError::DeadlineExceeded {
                            attempts: attempt,
                            elapsed: started.elapsed(),
                        });
                    }
                },
                None => operation(attempt).await,
            };

            let err = match outcome {
                Ok(value) => {
                    return Ok(Invoked {
                        value,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    })
                }
                Err(err) => err,
            };

            let classification = err.classification();
            if !policy.should_retry(classification) {
                debug!(attempt, %classification, error = %err, "Failure is not retryable");
                return Err(InvokeError::Rejected {
                    attempts: attempt,
                    classification,
                    error: err,
                });
            }

            if attempt >= max_attempts {
                error!(
                    attempts = attempt,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(InvokeError::Exhausted {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last: err,
                });
            }

            let mut delay = policy.delay_after(attempt);
            if let Some(hint) = classification.retry_after() {
                delay = delay.max(hint);
            }
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "Back-off would cross the deadline");
                    return Err(InvokeError::DeadlineExceeded {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                    });
                }
            }

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure; backing off"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn server_error() -> CompletionError {
        CompletionError::Server {
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<Invoked<()>, _> = ResilientInvoker
            .invoke(&policy, None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CompletionError::Authentication("bad key".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(InvokeError::Rejected {
                attempts: 1,
                classification: ErrorClassification::NonRetryable,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_retryable_failure_exhausts_three_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result: Result<Invoked<()>, _> = ResilientInvoker
            .invoke(&policy, None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        match result {
            Err(InvokeError::Exhausted {
                attempts, elapsed, last,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(elapsed, Duration::from_secs(3));
                assert_eq!(last, server_error());
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let policy = RetryPolicy::default();

        let result = ResilientInvoker
            .invoke(&policy, None, |attempt| async move {
                if attempt < 2 {
                    Err(CompletionError::Timeout)
                } else {
                    Ok(attempt * 10)
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, 20);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.elapsed, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_backoff() {
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result = ResilientInvoker
            .invoke(&policy, None, |attempt| async move {
                if attempt == 1 {
                    Err(CompletionError::RateLimited {
                        retry_after: Some(Duration::from_secs(5)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_in_flight_call() {
        let policy = RetryPolicy::default();
        let deadline = Instant::now() + Duration::from_secs(2);

        let result: Result<Invoked<()>, _> = ResilientInvoker
            .invoke(&policy, Some(deadline), |_| async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert_eq!(
            result,
            Err(InvokeError::DeadlineExceeded {
                attempts: 1,
                elapsed: Duration::from_secs(2)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_past_deadline_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let deadline = Instant::now() + Duration::from_millis(500);

        let result: Result<Invoked<()>, _> = ResilientInvoker
            .invoke(&policy, Some(deadline), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CompletionError::Timeout) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(InvokeError::DeadlineExceeded { attempts: 1, .. })));
    }
}
