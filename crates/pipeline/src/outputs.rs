//! Structured outputs of the five pipeline stages.
//!
//! A completion payload is untrusted input. [`StageOutput::parse`] turns it
//! into a typed value in three steps: structural deserialisation, light
//! normalisation of known model quirks, then field and cross-field
//! validation. Any failure is a retryable [`CompletionError::SchemaViolation`].
//!
//! The JSON Schema handed to the completion service is generated from the
//! same types via `schemars`, so the requested shape and the accepted shape
//! cannot drift apart.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::{CompletionError, StageName};

// ---------------------------------------------------------------------------
// Parse-then-validate contract
// ---------------------------------------------------------------------------

/// A typed, validated stage output.
pub trait StageOutput:
    Serialize + DeserializeOwned + JsonSchema + Validate + Send + Sync + Sized + 'static
{
    /// The stage that produces this output.
    const STAGE: StageName;

    /// JSON Schema sent to the completion service as the expected shape.
    fn output_schema() -> serde_json::Value {
        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<Self>();
        serde_json::to_value(schema).unwrap_or_default()
    }

    /// Repairs benign model quirks before validation.
    fn normalize(&mut self) {}

    /// Cross-field rules the derive-based validation cannot express.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Parses and validates an untrusted payload.
    fn parse(payload: serde_json::Value) -> Result<Self, CompletionError> {
        let mut output: Self = serde_json::from_value(payload)
            .map_err(|e| CompletionError::SchemaViolation(format!("{}: {e}", Self::STAGE)))?;
        output.normalize();
        output
            .validate()
            .map_err(|e| CompletionError::SchemaViolation(format!("{}: {e}", Self::STAGE)))?;
        output
            .check()
            .map_err(|e| CompletionError::SchemaViolation(format!("{}: {e}", Self::STAGE)))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// What the user is asking the data source to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Query,
    Write,
    Transform,
    Join,
    Aggregate,
    Analytics,
    SchemaInspection,
    Pipeline,
    Governance,
    Explain,
    Index,
    DocumentTransform,
    Search,
    Stream,
}

impl IntentType {
    /// Wire name of the intent type.
    pub fn as_str(self) -> &'static str {
        match self {
            IntentType::Query => "query",
            IntentType::Write => "write",
            IntentType::Transform => "transform",
            IntentType::Join => "join",
            IntentType::Aggregate => "aggregate",
            IntentType::Analytics => "analytics",
            IntentType::SchemaInspection => "schema_inspection",
            IntentType::Pipeline => "pipeline",
            IntentType::Governance => "governance",
            IntentType::Explain => "explain",
            IntentType::Index => "index",
            IntentType::DocumentTransform => "document_transform",
            IntentType::Search => "search",
            IntentType::Stream => "stream",
        }
    }
}

/// Broad family of the target data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Sql,
    NonSql,
}

/// Output of the Intent stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct IntentOutput {
    pub intent_type: IntentType,
    #[validate(length(min = 1))]
    pub intent_summary: String,
    pub source_category: SourceCategory,
    pub needs_aggregation: bool,
    pub needs_join: bool,
    pub needs_time_filter: bool,
    /// Estimated number of rows or documents the request returns.
    pub no_rows: u64,
}

impl StageOutput for IntentOutput {
    const STAGE: StageName = StageName::Intent;

    fn normalize(&mut self) {
        self.intent_summary = self.intent_summary.trim().to_string();
    }
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ColumnMaskingRule {
    #[validate(length(min = 1))]
    pub column: String,
    pub condition: String,
    #[validate(length(min = 1))]
    pub masking_function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Output of the Governance stage: the row filters and masking rules the plan
/// must honour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GovernanceOutput {
    #[serde(default)]
    pub row_filters: Vec<String>,
    #[serde(default)]
    pub column_masking_rules: Vec<ColumnMaskingRule>,
    #[serde(default)]
    pub governance_applied: Vec<String>,
    #[serde(default)]
    pub governance_impact: String,
    #[serde(default)]
    pub planning_notes: Vec<String>,
}

impl StageOutput for GovernanceOutput {
    const STAGE: StageName = StageName::Governance;

    fn normalize(&mut self) {
        self.row_filters.retain(|f| !f.trim().is_empty());
        self.governance_applied.retain(|r| !r.trim().is_empty());
    }

    fn check(&self) -> Result<(), String> {
        for rule in &self.column_masking_rules {
            rule.validate()
                .map_err(|e| format!("masking rule for '{}': {e}", rule.column))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryParameter {
    pub name: String,
    pub value: String,
}

/// Dialect-level description of the query a step runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default)]
    pub parameters: Vec<QueryParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projections: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Governance rules a step enforces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernanceApplied {
    #[serde(default)]
    pub rls_rules: Vec<String>,
    #[serde(default)]
    pub masking_rules: Vec<String>,
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct CommandStep {
    pub step: u32,
    #[validate(length(min = 1))]
    pub step_id: String,
    pub operation_type: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub data_source_id: i64,
    pub compute_type: String,
    pub compute_engine: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub query_payload: QueryPayload,
    #[serde(default)]
    pub governance_applied: GovernanceApplied,
    #[validate(length(min = 1))]
    pub output_artifact: String,
}

/// Output of the Planning stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ExecutionPlan {
    #[validate(length(min = 1))]
    pub strategy: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[validate(length(min = 1))]
    pub operations: Vec<CommandStep>,
}

impl StageOutput for ExecutionPlan {
    const STAGE: StageName = StageName::Planning;

    fn normalize(&mut self) {
        for op in &mut self.operations {
            if op.query.trim().is_empty() {
                if let Some(statement) = &op.query_payload.statement {
                    op.query = statement.clone();
                }
            }
        }
    }

    fn check(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for op in &self.operations {
            op.validate()
                .map_err(|e| format!("step '{}': {e}", op.step_id))?;
            if !seen.insert(op.step_id.as_str()) {
                return Err(format!("duplicate step_id '{}'", op.step_id));
            }
        }
        for op in &self.operations {
            if let Some(dep) = op.dependencies.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(format!(
                    "step '{}' depends on unknown step '{dep}'",
                    op.step_id
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Visualization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VisualizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<String>,
}

/// One recommended visualization of the plan's result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct Visualization {
    /// Chart type (`table`, `bar`, `line`, `pie`, ...).
    #[serde(rename = "type")]
    #[validate(length(min = 1))]
    pub kind: String,
    #[validate(length(min = 1))]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<String>,
    #[serde(default)]
    pub config: VisualizationConfig,
    #[serde(default)]
    pub is_primary: bool,
}

/// Output of the Visualization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct VisualizationOutput {
    #[validate(length(min = 1))]
    pub visualizations: Vec<Visualization>,
}

impl StageOutput for VisualizationOutput {
    const STAGE: StageName = StageName::Visualization;

    fn check(&self) -> Result<(), String> {
        for viz in &self.visualizations {
            viz.validate()
                .map_err(|e| format!("visualization '{}': {e}", viz.title))?;
        }
        match self.visualizations.iter().filter(|v| v.is_primary).count() {
            1 => Ok(()),
            n => Err(format!("expected exactly one primary visualization, found {n}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Output of the Analysis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct AnalysisOutput {
    /// Confidence on a 0–100 scale.
    #[validate(range(max = 100))]
    pub confidence: u32,
    /// Confidence on a 0.0–1.0 scale.
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_score: f64,
    #[validate(length(min = 1))]
    pub explanation: String,
    #[serde(default, deserialize_with = "flatten_strings")]
    #[schemars(with = "Vec<String>")]
    pub reasoning_steps: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl StageOutput for AnalysisOutput {
    const STAGE: StageName = StageName::Analysis;
}

/// Accepts a string, a list of strings, or arbitrarily nested lists and
/// flattens them into a list of non-empty strings.
fn flatten_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn walk(value: serde_json::Value, out: &mut Vec<String>) {
        match value {
            serde_json::Value::Null => {}
            serde_json::Value::String(s) if s.trim().is_empty() => {}
            serde_json::Value::String(s) => out.push(s),
            serde_json::Value::Array(items) => items.into_iter().for_each(|i| walk(i, out)),
            other => out.push(other.to_string()),
        }
    }

    let value = serde_json::Value::deserialize(deserializer)?;
    let mut out = Vec::new();
    walk(value, &mut out);
    Ok(out)
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub fn intent() -> IntentOutput {
        IntentOutput {
            intent_type: IntentType::Aggregate,
            intent_summary: "Top 10 customers by revenue".into(),
            source_category: SourceCategory::Sql,
            needs_aggregation: true,
            needs_join: false,
            needs_time_filter: true,
            no_rows: 10,
        }
    }
}
