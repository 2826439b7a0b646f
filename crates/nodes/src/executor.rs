//! The stage pipeline.
//!
//! Intent, Governance and Planning run in sequence. Once a plan exists,
//! Visualization (when requested) and Analysis are dispatched concurrently.
//! A mandatory stage failure halts the pipeline; a Visualization failure is
//! recorded and otherwise ignored. The remaining deadline budget is checked
//! before every dispatch.

use std::sync::Arc;

use pipeline::{
    AnalysisOutput, CompletionService, ContextError, ExecutionPlan, GovernanceOutput,
    IntentOutput, PlanningError, PromptBuilder, StageContext, StageName,
    StageOutcome, TokenUsage, VisualizationOutput,
};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::StageRetryPolicies;
use crate::stages::{run_stage, StageFailure, StageInputs, StageSuccess};

/// Everything the pipeline produced for one request, successful or not.
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Outputs of every stage that succeeded.
    pub context: StageContext,
    /// One record per stage that ran, in dispatch order.
    pub outcomes: Vec<StageOutcome>,
    /// Tokens consumed across all stages.
    pub usage: TokenUsage,
    /// Why the request failed, if it did.
    pub failure: Option<PlanningError>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    fn note(&mut self, outcome: StageOutcome) {
        self.usage += outcome.tokens_used;
        self.outcomes.push(outcome);
    }

    /// Records a successful stage. Returns `false` if the context refused the
    /// output, which fails the request.
    fn accept<T>(
        &mut self,
        success: StageSuccess<T>,
        correlation_id: pipeline::CorrelationId,
        record: impl FnOnce(&mut StageContext, T) -> Result<(), ContextError>,
    ) -> bool {
        self.note(success.outcome);
        match record(&mut self.context, success.output) {
            Ok(()) => true,
            Err(err) => {
                error!(%correlation_id, error = %err, "Stage context rejected an output");
                self.failure = Some(PlanningError::Internal {
                    correlation_id,
                    detail: err.to_string(),
                });
                false
            }
        }
    }

    fn reject(&mut self, failure: StageFailure) {
        self.note(failure.outcome);
        self.failure = Some(failure.error);
    }
}

/// Sequences the five stages against a completion service.
#[derive(Clone)]
pub struct StagePipeline {
    service: Arc<dyn CompletionService>,
    prompts: Arc<dyn PromptBuilder>,
    retry: StageRetryPolicies,
}

impl std::fmt::Debug for StagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagePipeline")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StagePipeline {
    pub fn new(
        service: Arc<dyn CompletionService>,
        prompts: Arc<dyn PromptBuilder>,
        retry: StageRetryPolicies,
    ) -> Self {
        Self {
            service,
            prompts,
            retry,
        }
    }

    /// Returns a copy that builds stage input with `prompts`.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Runs every stage the request needs.
    pub async fn execute(&self, inputs: StageInputs<'_>) -> PipelineReport {
        let mut report = PipelineReport::default();
        let service = self.service.as_ref();
        let prompts = self.prompts.as_ref();
        let retry = &self.retry;

        if !budget_left(&mut report, StageName::Intent, inputs.deadline) {
            return report;
        }
        match run_stage::<IntentOutput>(
            service,
            prompts,
            retry.for_stage(StageName::Intent),
            inputs,
            &report.context,
        )
        .await
        {
            Ok(success) => {
                if !report.accept(success, inputs.correlation_id, StageContext::record_intent) {
                    return report;
                }
            }
            Err(failure) => {
                report.reject(failure);
                return report;
            }
        }

        if !budget_left(&mut report, StageName::Governance, inputs.deadline) {
            return report;
        }
        match run_stage::<GovernanceOutput>(
            service,
            prompts,
            retry.for_stage(StageName::Governance),
            inputs,
            &report.context,
        )
        .await
        {
            Ok(success) => {
                if !report.accept(success, inputs.correlation_id, StageContext::record_governance) {
                    return report;
                }
            }
            Err(failure) => {
                report.reject(failure);
                return report;
            }
        }

        if !budget_left(&mut report, StageName::Planning, inputs.deadline) {
            return report;
        }
        match run_stage::<ExecutionPlan>(
            service,
            prompts,
            retry.for_stage(StageName::Planning),
            inputs,
            &report.context,
        )
        .await
        {
            Ok(success) => {
                if !report.accept(success, inputs.correlation_id, StageContext::record_plan) {
                    return report;
                }
            }
            Err(failure) => {
                report.reject(failure);
                return report;
            }
        }

        if !budget_left(&mut report, StageName::Analysis, inputs.deadline) {
            return report;
        }
        let include_visualization = inputs.request.include_visualization;
        let context = &report.context;
        let visualization = async {
            if include_visualization {
                Some(
                    run_stage::<VisualizationOutput>(
                        service,
                        prompts,
                        retry.for_stage(StageName::Visualization),
                        inputs,
                        context,
                    )
                    .await,
                )
            } else {
                None
            }
        };
        let analysis = run_stage::<AnalysisOutput>(
            service,
            prompts,
            retry.for_stage(StageName::Analysis),
            inputs,
            context,
        );
        let (visualization, analysis) = tokio::join!(visualization, analysis);

        match visualization {
            Some(Ok(success)) => {
                if !report.accept(
                    success,
                    inputs.correlation_id,
                    StageContext::record_visualization,
                ) {
                    return report;
                }
            }
            Some(Err(failure)) => {
                warn!(
                    code = failure.error.code(),
                    "Optional visualization stage failed; continuing without it"
                );
                report.note(failure.outcome);
            }
            None => debug!("Visualization not requested"),
        }

        match analysis {
            Ok(success) => {
                report.accept(success, inputs.correlation_id, StageContext::record_analysis);
            }
            Err(failure) => report.reject(failure),
        }

        report
    }
}

/// Fails the report with a timeout naming `next` if the deadline has passed.
fn budget_left(report: &mut PipelineReport, next: StageName, deadline: Instant) -> bool {
    if Instant::now() < deadline {
        return true;
    }
    warn!(stage = %next, "Deadline reached before stage dispatch");
    report.failure = Some(PlanningError::Timeout { stage: Some(next) });
    false
}
