//! Per-request stage bookkeeping: the append-only [`StageContext`] and the
//! per-stage [`StageOutcome`] diagnostics.

use serde::{Deserialize, Serialize};

use crate::{
    AnalysisOutput, ContextError, ExecutionPlan, GovernanceOutput, IntentOutput, TokenUsage,
    VisualizationOutput,
};

// ---------------------------------------------------------------------------
// Stage names
// ---------------------------------------------------------------------------

/// One externally backed step of the planning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Classifies what the user is asking for.
    Intent,
    /// Resolves row filters and masking rules that must apply.
    Governance,
    /// Produces the execution plan.
    Planning,
    /// Recommends visualizations. Optional.
    Visualization,
    /// Scores the plan and suggests improvements.
    Analysis,
}

impl StageName {
    /// All stages in dispatch order.
    pub const ALL: [StageName; 5] = [
        StageName::Intent,
        StageName::Governance,
        StageName::Planning,
        StageName::Visualization,
        StageName::Analysis,
    ];

    /// Lower-case stage name, as used in envelopes and spans.
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Intent => "intent",
            StageName::Governance => "governance",
            StageName::Planning => "planning",
            StageName::Visualization => "visualization",
            StageName::Analysis => "analysis",
        }
    }

    /// Returns `true` if a failure of this stage fails the whole request.
    pub fn is_mandatory(self) -> bool {
        !matches!(self, StageName::Visualization)
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stage context
// ---------------------------------------------------------------------------

/// Append-only accumulator of validated stage outputs for one request.
///
/// Each slot is written exactly once by its owning stage. Writes to an
/// occupied slot fail with [`ContextError::AlreadyRecorded`]; reads of an
/// empty slot a stage depends on fail with [`ContextError::Missing`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    intent: Option<IntentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    governance: Option<GovernanceOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<ExecutionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visualization: Option<VisualizationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis: Option<AnalysisOutput>,
}

fn record<T>(slot: &mut Option<T>, stage: StageName, value: T) -> Result<(), ContextError> {
    if slot.is_some() {
        return Err(ContextError::AlreadyRecorded(stage));
    }
    *slot = Some(value);
    Ok(())
}

impl StageContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_intent(&mut self, value: IntentOutput) -> Result<(), ContextError> {
        record(&mut self.intent, StageName::Intent, value)
    }

    pub fn record_governance(&mut self, value: GovernanceOutput) -> Result<(), ContextError> {
        record(&mut self.governance, StageName::Governance, value)
    }

    pub fn record_plan(&mut self, value: ExecutionPlan) -> Result<(), ContextError> {
        record(&mut self.plan, StageName::Planning, value)
    }

    pub fn record_visualization(
        &mut self,
        value: VisualizationOutput,
    ) -> Result<(), ContextError> {
        record(&mut self.visualization, StageName::Visualization, value)
    }

    pub fn record_analysis(&mut self, value: AnalysisOutput) -> Result<(), ContextError> {
        record(&mut self.analysis, StageName::Analysis, value)
    }

    pub fn intent(&self) -> Option<&IntentOutput> {
        self.intent.as_ref()
    }

    pub fn governance(&self) -> Option<&GovernanceOutput> {
        self.governance.as_ref()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.plan.as_ref()
    }

    pub fn visualization(&self) -> Option<&VisualizationOutput> {
        self.visualization.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisOutput> {
        self.analysis.as_ref()
    }

    /// Intent output, required by every stage after Intent.
    pub fn require_intent(&self) -> Result<&IntentOutput, ContextError> {
        self.intent
            .as_ref()
            .ok_or(ContextError::Missing(StageName::Intent))
    }

    /// Governance output, required by Planning.
    pub fn require_governance(&self) -> Result<&GovernanceOutput, ContextError> {
        self.governance
            .as_ref()
            .ok_or(ContextError::Missing(StageName::Governance))
    }

    /// Plan, required by Visualization and Analysis.
    pub fn require_plan(&self) -> Result<&ExecutionPlan, ContextError> {
        self.plan
            .as_ref()
            .ok_or(ContextError::Missing(StageName::Planning))
    }

    /// Analysis output, required by the response assembler.
    pub fn require_analysis(&self) -> Result<&AnalysisOutput, ContextError> {
        self.analysis
            .as_ref()
            .ok_or(ContextError::Missing(StageName::Analysis))
    }

    /// Returns `true` if `stage` has recorded its output.
    pub fn has(&self, stage: StageName) -> bool {
        match stage {
            StageName::Intent => self.intent.is_some(),
            StageName::Governance => self.governance.is_some(),
            StageName::Planning => self.plan.is_some(),
            StageName::Visualization => self.visualization.is_some(),
            StageName::Analysis => self.analysis.is_some(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage outcomes
// ---------------------------------------------------------------------------

/// Diagnostic record of one executed stage.
///
/// Retained for every stage that ran, including on pipeline failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The stage this outcome describes.
    pub stage: StageName,
    /// Whether the stage produced a validated output.
    pub success: bool,
    /// The validated output, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Caller-safe failure description, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completion attempts made.
    pub attempts: u32,
    /// Tokens consumed by the successful attempt.
    pub tokens_used: TokenUsage,
    /// Wall-clock time spent in the stage, including back-off.
    pub elapsed_ms: u64,
}

impl StageOutcome {
    /// Outcome of a stage that produced `output`.
    pub fn succeeded(
        stage: StageName,
        output: serde_json::Value,
        attempts: u32,
        tokens_used: TokenUsage,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            stage,
            success: true,
            output: Some(output),
            error: None,
            attempts,
            tokens_used,
            elapsed_ms,
        }
    }

    /// Outcome of a stage that failed with `error`.
    pub fn failed(stage: StageName, error: impl Into<String>, attempts: u32, elapsed_ms: u64) -> Self {
        Self {
            stage,
            success: false,
            output: None,
            error: Some(error.into()),
            attempts,
            tokens_used: TokenUsage::default(),
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::test_fixtures;

    #[test]
    fn slots_are_write_once() {
        let mut ctx = StageContext::new();
        ctx.record_intent(test_fixtures::intent()).unwrap();
        assert_eq!(
            ctx.record_intent(test_fixtures::intent()),
            Err(ContextError::AlreadyRecorded(StageName::Intent))
        );
        assert!(ctx.has(StageName::Intent));
        assert!(!ctx.has(StageName::Governance));
    }

    #[test]
    fn missing_dependencies_are_reported_by_stage() {
        let ctx = StageContext::new();
        assert_eq!(
            ctx.require_plan().unwrap_err(),
            ContextError::Missing(StageName::Planning)
        );
        assert_eq!(
            ctx.require_governance().unwrap_err(),
            ContextError::Missing(StageName::Governance)
        );
    }

    #[test]
    fn empty_slots_are_not_serialized() {
        let mut ctx = StageContext::new();
        ctx.record_intent(test_fixtures::intent()).unwrap();
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("intent").is_some());
        assert!(json.get("plan").is_none());
    }

    #[test]
    fn only_visualization_is_optional() {
        let optional: Vec<_> = StageName::ALL
            .iter()
            .filter(|s| !s.is_mandatory())
            .collect();
        assert_eq!(optional, vec![&StageName::Visualization]);
    }
}
