//! Retry policy values.
//!
//! A [`RetryPolicy`] is plain data: how many attempts, which delays, and
//! which classifications are worth another attempt. The mechanics of waiting
//! and re-invoking live in the `nodes` crate's invoker, which takes a policy
//! per call.

use std::time::Duration;

use crate::ErrorClassification;

/// Decides whether a failure of the given classification is retried.
pub type RetryPredicate = fn(ErrorClassification) -> bool;

/// Immutable retry configuration for one invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delays: Vec<Duration>,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    /// Total attempts made by [`RetryPolicy::default`].
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Creates a policy.
    ///
    /// Returns `None` if `max_attempts` is zero. When more attempts are
    /// allowed than `delays` lists, the last delay is doubled for each extra
    /// attempt; an empty schedule means no waiting.
    #[must_use]
    pub fn new(max_attempts: u32, delays: Vec<Duration>, retryable: RetryPredicate) -> Option<Self> {
        if max_attempts == 0 {
            return None;
        }
        Some(Self {
            max_attempts,
            delays,
            retryable,
        })
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delays: Vec::new(),
            retryable: ErrorClassification::is_retryable,
        }
    }

    /// Returns a copy with a different attempt budget (at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Returns a copy with a different delay schedule.
    #[must_use]
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured delay schedule.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Whether a failure with `classification` may be retried under this
    /// policy.
    pub fn should_retry(&self, classification: ErrorClassification) -> bool {
        (self.retryable)(classification)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    /// before making the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        match self.delays.get(index) {
            Some(delay) => *delay,
            None => match self.delays.last() {
                Some(last) => {
                    let extra = (index + 1 - self.delays.len()).min(16) as u32;
                    last.saturating_mul(2u32.saturating_pow(extra))
                }
                None => Duration::ZERO,
            },
        }
    }
}

impl Default for RetryPolicy {
    /// Three attempts with 1s, 2s, 4s back-off, retrying only
    /// [`ErrorClassification::Retryable`] failures.
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            retryable: ErrorClassification::is_retryable,
        }
    }
}
