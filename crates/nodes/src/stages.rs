//! Execution of a single pipeline stage.
//!
//! A stage builds its prompt from the request and the context so far, calls
//! the completion service through the [`ResilientInvoker`] under the stage's
//! [`RetryPolicy`], and parses the payload into its typed output. Parsing
//! happens inside the retried operation, so a schema-violating payload is
//! retried like any other retryable failure.

use std::time::Duration;

use pipeline::{
    AnalyzeRequest, CompletionRequest, CompletionService, CorrelationId, ModelName, PlanningError,
    PromptBuilder, RetryPolicy, StageContext, StageName, StageOutcome, StageOutput, Temperature,
    TokenUsage,
};
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::invoker::{InvokeError, ResilientInvoker};

/// Per-request values every stage needs.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs<'a> {
    pub request: &'a AnalyzeRequest,
    pub model: &'a ModelName,
    pub temperature: Temperature,
    pub deadline: Instant,
    pub correlation_id: CorrelationId,
}

/// A stage that produced a validated output.
#[derive(Debug)]
pub struct StageSuccess<T> {
    pub output: T,
    pub outcome: StageOutcome,
}

/// A stage that failed, with its diagnostic record.
#[derive(Debug)]
pub struct StageFailure {
    pub error: PlanningError,
    pub outcome: StageOutcome,
}

/// Runs the stage producing `T`.
pub async fn run_stage<T: StageOutput>(
    service: &dyn CompletionService,
    prompts: &dyn PromptBuilder,
    policy: &RetryPolicy,
    inputs: StageInputs<'_>,
    context: &StageContext,
) -> Result<StageSuccess<T>, StageFailure> {
    let stage = T::STAGE;
    let span = info_span!("stage", stage = %stage);
    async move {
        let started = Instant::now();

        let prompt = match prompts.build(stage, inputs.request, context) {
            Ok(prompt) => prompt,
            Err(err) => {
                let detail = format!("building prompt for stage '{stage}': {err}");
                error!(correlation_id = %inputs.correlation_id, %detail, "Stage input could not be built");
                return Err(internal_failure(stage, inputs.correlation_id, detail, 0, started));
            }
        };

        let call = CompletionRequest {
            stage,
            system_instruction: prompt.system_instruction,
            content: prompt.content,
            schema: T::output_schema(),
            model: inputs.model.clone(),
            temperature: inputs.temperature,
        };

        let result = ResilientInvoker
            .invoke(policy, Some(inputs.deadline), |_| {
                let call = call.clone();
                async move {
                    let completion = service.complete(call).await?;
                    let output = T::parse(completion.payload)?;
                    Ok::<(T, TokenUsage), pipeline::CompletionError>((output, completion.usage))
                }
            })
            .await;

        match result {
            Ok(invoked) => {
                let (output, usage) = invoked.value;
                let value = match serde_json::to_value(&output) {
                    Ok(value) => value,
                    Err(err) => {
                        let detail = format!("recording output of stage '{stage}': {err}");
                        error!(correlation_id = %inputs.correlation_id, %detail, "Stage output could not be recorded");
                        return Err(internal_failure(
                            stage,
                            inputs.correlation_id,
                            detail,
                            invoked.attempts,
                            started,
                        ));
                    }
                };
                info!(
                    attempts = invoked.attempts,
                    input_tokens = usage.input.as_u64(),
                    output_tokens = usage.output.as_u64(),
                    total_tokens = usage.total().as_u64(),
                    elapsed_ms = millis(invoked.elapsed),
                    "Stage completed"
                );
                Ok(StageSuccess {
                    output,
                    outcome: StageOutcome::succeeded(
                        stage,
                        value,
                        invoked.attempts,
                        usage,
                        millis(started.elapsed()),
                    ),
                })
            }
            Err(err) => {
                let attempts = err.attempts();
                let error = stage_error(stage, err);
                warn!(attempts, code = error.code(), error = %error, "Stage failed");
                Err(StageFailure {
                    outcome: StageOutcome::failed(
                        stage,
                        error.public_message(),
                        attempts,
                        millis(started.elapsed()),
                    ),
                    error,
                })
            }
        }
    }
    .instrument(span)
    .await
}

/// A failure caused by a defect in this process rather than the provider.
fn internal_failure(
    stage: StageName,
    correlation_id: CorrelationId,
    detail: String,
    attempts: u32,
    started: Instant,
) -> StageFailure {
    let error = PlanningError::Internal {
        correlation_id,
        detail,
    };
    StageFailure {
        outcome: StageOutcome::failed(
            stage,
            error.public_message(),
            attempts,
            millis(started.elapsed()),
        ),
        error,
    }
}

/// Maps an invocation failure to the caller-facing error for `stage`.
fn stage_error(stage: StageName, err: InvokeError) -> PlanningError {
    match err {
        InvokeError::Rejected {
            classification,
            error,
            ..
        } => PlanningError::ExternalService {
            stage,
            classification,
            message: error.to_string(),
        },
        InvokeError::Exhausted { attempts, last, .. } if last.is_output_defect() => {
            PlanningError::PlanGeneration {
                stage,
                attempts,
                reason: last.to_string(),
            }
        }
        InvokeError::Exhausted {
            attempts, elapsed, ..
        } => PlanningError::ServiceUnavailable {
            stage,
            attempts,
            elapsed,
        },
        InvokeError::DeadlineExceeded { .. } => PlanningError::Timeout { stage: Some(stage) },
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
