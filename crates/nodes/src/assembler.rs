//! Builds the outbound envelope from a pipeline report.

use std::time::Duration;

use pipeline::{
    AiMetadata, AnalyzeRequest, CorrelationId, ErrorBody, ModelName, PlanId, PlanningError,
    ResponseEnvelope, ResponseStatus, Timestamp,
};
use tracing::error;

use crate::executor::PipelineReport;
use crate::stages::millis;

/// Merges stage outputs into a [`ResponseEnvelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAssembler;

impl ResponseAssembler {
    /// Builds the envelope for `report`.
    ///
    /// A report without a failure but missing a mandatory output is an
    /// internal defect and yields a failed envelope.
    pub fn assemble(
        &self,
        request: &AnalyzeRequest,
        model: &ModelName,
        report: PipelineReport,
        correlation_id: CorrelationId,
        elapsed: Duration,
    ) -> ResponseEnvelope {
        let PipelineReport {
            context,
            outcomes,
            usage,
            failure,
        } = report;

        let failure = failure.or_else(|| {
            let missing = context
                .require_intent()
                .err()
                .or_else(|| context.require_governance().err())
                .or_else(|| context.require_plan().err())
                .or_else(|| context.require_analysis().err())?;
            error!(%correlation_id, error = %missing, "Pipeline finished without a mandatory output");
            Some(PlanningError::Internal {
                correlation_id,
                detail: missing.to_string(),
            })
        });

        let mut ai_metadata = AiMetadata::empty(model.clone());
        ai_metadata.input_tokens = usage.input.as_u64();
        ai_metadata.output_tokens = usage.output.as_u64();
        ai_metadata.generation_time_ms = millis(elapsed);

        let (status, plan_id, error) = match &failure {
            None => (ResponseStatus::Success, Some(PlanId::new_random()), None),
            Some(err) => (
                ResponseStatus::Failed,
                None,
                Some(ErrorBody::from_error(err, correlation_id)),
            ),
        };

        let mut suggestions = Vec::new();
        if let Some(analysis) = context.analysis() {
            ai_metadata.confidence = Some(analysis.confidence);
            ai_metadata.confidence_score = Some(analysis.confidence_score);
            ai_metadata.explanation = Some(analysis.explanation.clone());
            ai_metadata.reasoning_steps = analysis.reasoning_steps.clone();
            suggestions = analysis.suggestions.clone();
        }

        ResponseEnvelope {
            request_id: request.request_id.clone(),
            execution_id: request.execution_id.clone(),
            plan_id,
            status,
            timestamp: Timestamp::now(),
            intent_type: context.intent().map(|i| i.intent_type),
            intent_summary: context.intent().map(|i| i.intent_summary.clone()),
            governance: context.governance().cloned(),
            execution_plan: context.plan().cloned(),
            visualization: context.visualization().map(|v| v.visualizations.clone()),
            ai_metadata,
            suggestions,
            diagnostics: outcomes,
            error,
        }
    }
}
