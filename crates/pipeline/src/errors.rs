//! Error taxonomy and failure classification for the planning domain.
//!
//! [`CompletionError`] is what a completion service (or the schema validation
//! wrapped around it) reports for a single call. Every such error carries an
//! [`ErrorClassification`] that drives retry decisions.
//!
//! [`PlanningError`] covers conditions surfaced to the caller: validation and
//! admission rejections, stage failures after retries, deadline expiry, and
//! internal defects.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CorrelationId, StageName};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Whether a failure is safe to retry.
///
/// ## Rules
///
/// - `Retryable`: connection and timeout errors, rate-limit responses,
///   server-side failures, unparseable or schema-violating model output.
/// - `NonRetryable`: authentication/authorization failures, rejected requests,
///   not-found, invalid credentials.
/// - `Fatal`: defects in the adapter or the pipeline itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorClassification {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off the remote side asked for (e.g. `Retry-After`).
        /// `None` means the caller's own schedule applies.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
    /// An unexpected defect; never retried and never described to the caller.
    Fatal,
}

impl ErrorClassification {
    /// Retryable with no server-supplied delay hint.
    pub const RETRYABLE: ErrorClassification = ErrorClassification::Retryable { after: None };

    /// Returns `true` for [`ErrorClassification::Retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClassification::Retryable { .. })
    }

    /// The server-supplied minimum delay, if any.
    pub fn retry_after(self) -> Option<Duration> {
        match self {
            ErrorClassification::Retryable { after } => after,
            _ => None,
        }
    }

    /// Short label used in logs and failure envelopes.
    pub fn label(self) -> &'static str {
        match self {
            ErrorClassification::Retryable { .. } => "retryable",
            ErrorClassification::NonRetryable => "non_retryable",
            ErrorClassification::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Completion-level errors
// ---------------------------------------------------------------------------

/// Failure of a single completion call, including validation of its payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompletionError {
    /// The service could not be reached.
    #[error("Connection to completion service failed: {0}")]
    Connection(String),

    /// The call did not complete within the transport timeout.
    #[error("Completion request timed out")]
    Timeout,

    /// The service throttled the call.
    #[error("Completion service rate limit hit")]
    RateLimited {
        /// Delay requested by the service, when it supplied one.
        retry_after: Option<Duration>,
    },

    /// The service failed on its side (5xx-equivalent).
    #[error("Completion service error (status {status}): {message}")]
    Server {
        /// Transport status code.
        status: u16,
        /// Error body or reason phrase.
        message: String,
    },

    /// The payload was not parseable as the structured output requested.
    #[error("Malformed structured response: {0}")]
    MalformedResponse(String),

    /// The payload parsed but violated the stage's output schema.
    #[error("Stage output failed schema validation: {0}")]
    SchemaViolation(String),

    /// Credentials were missing, invalid, or lacked permission.
    #[error("Completion service rejected credentials: {0}")]
    Authentication(String),

    /// The service rejected the request as malformed.
    #[error("Completion service rejected the request: {0}")]
    InvalidRequest(String),

    /// The model or endpoint does not exist.
    #[error("Completion resource not found: {0}")]
    NotFound(String),

    /// An unexpected defect inside the adapter.
    #[error("Internal completion adapter error: {0}")]
    Internal(String),
}

impl CompletionError {
    /// Classifies this error for the retry loop.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            CompletionError::Connection(_)
            | CompletionError::Timeout
            | CompletionError::Server { .. }
            | CompletionError::MalformedResponse(_)
            | CompletionError::SchemaViolation(_) => ErrorClassification::RETRYABLE,
            CompletionError::RateLimited { retry_after } => ErrorClassification::Retryable {
                after: *retry_after,
            },
            CompletionError::Authentication(_)
            | CompletionError::InvalidRequest(_)
            | CompletionError::NotFound(_) => ErrorClassification::NonRetryable,
            CompletionError::Internal(_) => ErrorClassification::Fatal,
        }
    }

    /// Returns `true` when the payload was received but could not be turned
    /// into a valid stage output.
    pub fn is_output_defect(&self) -> bool {
        matches!(
            self,
            CompletionError::MalformedResponse(_) | CompletionError::SchemaViolation(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Request-level errors
// ---------------------------------------------------------------------------

/// Errors surfaced to the caller of the planning service.
///
/// Retryable completion failures never appear here directly; they are
/// absorbed by the retry loop and only surface once it gives up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanningError {
    /// The inbound request was malformed. No stage ran.
    #[error("Invalid request: {message}")]
    Validation {
        /// Every problem found, joined for display.
        message: String,
    },

    /// The client exceeded its admission window. No stage ran.
    #[error("Rate limit exceeded; retry after {}s", .retry_after.as_secs())]
    RateLimitExceeded {
        /// Time until the client will be admitted again.
        retry_after: Duration,
    },

    /// A stage never produced output that passed schema validation.
    #[error("Stage '{stage}' produced no valid output after {attempts} attempt(s): {reason}")]
    PlanGeneration {
        /// The failing stage.
        stage: StageName,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last validation failure.
        reason: String,
    },

    /// The completion service refused a stage's call outright.
    #[error("Completion service refused stage '{stage}' ({classification}): {message}")]
    ExternalService {
        /// The failing stage.
        stage: StageName,
        /// Classification of the refusal.
        classification: ErrorClassification,
        /// Underlying error description (kept server-side).
        message: String,
    },

    /// Retries against the completion service were exhausted.
    #[error(
        "Completion service unavailable during stage '{stage}' after {attempts} attempt(s) in {}ms",
        .elapsed.as_millis()
    )]
    ServiceUnavailable {
        /// The failing stage.
        stage: StageName,
        /// Attempts made.
        attempts: u32,
        /// Total time spent across attempts and back-off.
        elapsed: Duration,
    },

    /// The request deadline passed before or during a stage.
    #[error("Request deadline exceeded{}", .stage.map(|s| format!(" at stage '{s}'")).unwrap_or_default())]
    Timeout {
        /// The stage that could not be started or completed, if any.
        stage: Option<StageName>,
    },

    /// An unexpected defect. Full detail is logged, never returned.
    #[error("Internal error (correlation id {correlation_id}): {detail}")]
    Internal {
        /// Correlates the caller-visible failure with the server log.
        correlation_id: CorrelationId,
        /// Full description for the log.
        detail: String,
    },
}

impl PlanningError {
    /// Stable machine-readable code for the failure envelope.
    pub fn code(&self) -> &'static str {
        match self {
            PlanningError::Validation { .. } => "VALIDATION_ERROR",
            PlanningError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            PlanningError::PlanGeneration { .. } => "PLAN_GENERATION_ERROR",
            PlanningError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            PlanningError::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            PlanningError::Timeout { .. } => "TIMEOUT",
            PlanningError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// The stage the failure is attributed to, if any.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PlanningError::PlanGeneration { stage, .. }
            | PlanningError::ExternalService { stage, .. }
            | PlanningError::ServiceUnavailable { stage, .. } => Some(*stage),
            PlanningError::Timeout { stage } => *stage,
            _ => None,
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Internal and provider-originated detail stays in the log.
    pub fn public_message(&self) -> String {
        match self {
            PlanningError::Internal { .. } => "An internal error occurred".to_string(),
            PlanningError::ExternalService {
                stage,
                classification,
                ..
            } => format!("Completion service refused stage '{stage}' ({classification})"),
            PlanningError::PlanGeneration {
                stage, attempts, ..
            } => format!("Stage '{stage}' produced no valid output after {attempts} attempt(s)"),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage context errors
// ---------------------------------------------------------------------------

/// Violations of the forward-only stage data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A stage tried to record output a second time.
    #[error("Output of stage '{0}' is already recorded")]
    AlreadyRecorded(StageName),

    /// A stage needed output from a stage that has not completed.
    #[error("Output of stage '{0}' is required but missing")]
    Missing(StageName),
}
