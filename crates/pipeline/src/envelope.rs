//! Outbound response types.
//!
//! A [`ResponseEnvelope`] is returned for every request that passed
//! validation and admission, whether the pipeline succeeded or not. Requests
//! turned away by the admission controller get a [`RateLimitRejection`]
//! instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    CorrelationId, ExecutionId, ExecutionPlan, GovernanceOutput, IntentType, ModelName,
    PlanId, PlanningError, RequestId, StageName, StageOutcome, Timestamp, Visualization,
};

/// Terminal status of a planning request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// Model usage and self-assessment attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMetadata {
    pub model: ModelName,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Wall-clock time spent producing this envelope. Near zero on a cache
    /// hit.
    pub generation_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    pub cache_hit: bool,
}

impl AiMetadata {
    /// Metadata with no usage recorded yet.
    pub fn empty(model: ModelName) -> Self {
        Self {
            model,
            input_tokens: 0,
            output_tokens: 0,
            generation_time_ms: 0,
            confidence: None,
            confidence_score: None,
            explanation: None,
            reasoning_steps: Vec::new(),
            cache_hit: false,
        }
    }
}

/// Caller-visible description of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code, e.g. `PLAN_GENERATION_ERROR`.
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    pub correlation_id: CorrelationId,
}

impl ErrorBody {
    /// Builds the caller-safe body for `error`.
    pub fn from_error(error: &PlanningError, correlation_id: CorrelationId) -> Self {
        let correlation_id = match error {
            PlanningError::Internal { correlation_id, .. } => *correlation_id,
            _ => correlation_id,
        };
        Self {
            code: error.code().to_string(),
            message: error.public_message(),
            stage: error.stage(),
            correlation_id,
        }
    }
}

/// The response to a planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: RequestId,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<PlanId>,
    pub status: ResponseStatus,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<IntentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_summary: Option<String>,
    /// Governance rules resolved for the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    /// Present only when visualization was requested and succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Vec<Visualization>>,
    pub ai_metadata: AiMetadata,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// One entry per stage that ran, in dispatch order.
    #[serde(default)]
    pub diagnostics: Vec<StageOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    /// Returns `true` when `status` is [`ResponseStatus::Success`].
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Re-stamps a cached envelope for delivery to a new request.
    ///
    /// Identity and timing are replaced; the plan content is served as
    /// stored.
    pub fn restamped_for_cache_hit(
        mut self,
        request_id: RequestId,
        execution_id: ExecutionId,
        lookup_ms: u64,
    ) -> Self {
        self.request_id = request_id;
        self.execution_id = execution_id;
        self.timestamp = Timestamp::now();
        self.ai_metadata.cache_hit = true;
        self.ai_metadata.generation_time_ms = lookup_ms;
        self
    }
}

/// Structured "too many requests" answer from the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRejection {
    /// Seconds until the client will be admitted again, rounded up.
    pub retry_after_secs: u64,
    /// Requests admitted per window.
    pub limit: u32,
    pub window_secs: u64,
}

impl RateLimitRejection {
    pub fn new(retry_after: Duration, limit: u32, window: Duration) -> Self {
        Self {
            retry_after_secs: ceil_secs(retry_after),
            limit,
            window_secs: window.as_secs(),
        }
    }

    /// The equivalent [`PlanningError::RateLimitExceeded`].
    pub fn to_error(self) -> PlanningError {
        PlanningError::RateLimitExceeded {
            retry_after: Duration::from_secs(self.retry_after_secs),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs() + 1
    } else {
        d.as_secs()
    }
}
