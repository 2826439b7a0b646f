//! Inbound analyze request and its validation rules.
//!
//! The request is deserialised leniently (missing optional blocks get
//! defaults) and then checked by [`AnalyzeRequest::validate`], which reports
//! every problem at once rather than the first one found.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ExecutionId, ModelName, PlanningError, RequestId, Temperature, Timestamp};

/// Relational database types accepted as data sources.
pub const SQL_SOURCE_TYPES: &[&str] = &["postgresql", "mysql", "mariadb", "sqlserver", "oracle"];

/// Cloud warehouse types accepted as data sources.
pub const WAREHOUSE_SOURCE_TYPES: &[&str] =
    &["snowflake", "bigquery", "redshift", "synapse", "databricks"];

/// Document, key-value, and search stores accepted as data sources.
pub const NOSQL_SOURCE_TYPES: &[&str] =
    &["mongodb", "cassandra", "redis", "dynamodb", "elasticsearch"];

/// Returns `true` if `source_type` (case-insensitive, surrounding whitespace
/// ignored) is a supported data source type.
pub fn is_supported_source_type(source_type: &str) -> bool {
    let normalized = source_type.trim().to_ascii_lowercase();
    SQL_SOURCE_TYPES
        .iter()
        .chain(WAREHOUSE_SOURCE_TYPES)
        .chain(NOSQL_SOURCE_TYPES)
        .any(|t| *t == normalized)
}

// ---------------------------------------------------------------------------
// Request model
// ---------------------------------------------------------------------------

/// Identity and entitlements of the user the plan is generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: i64,
    pub workspace_id: i64,
    pub organization_id: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub column_name: String,
    pub column_type: String,
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_foreign_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_comment: Option<String>,
    #[serde(default)]
    pub pii: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub table_name: String,
    #[serde(default = "default_table_type")]
    pub table_type: String,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

fn default_table_type() -> String {
    "table".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub schema_name: String,
    #[serde(default)]
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masking_function: Option<String>,
}

/// A switchable set of governance rules (row-level security or masking).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rules: Vec<GovernanceRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernancePolicies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_level_security: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_masking: Option<RuleSet>,
}

/// A data source the plan may read from or write to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub data_source_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    /// Caller-maintained version of the schema snapshot. When absent, the
    /// fingerprint derives one from the schema content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub schemas: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_policies: Option<GovernancePolicies>,
}

/// Limits the generated plan must respect at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default = "ExecutionContext::default_max_rows")]
    pub max_rows: u32,
    #[serde(default = "ExecutionContext::default_timeout_seconds")]
    pub timeout_seconds: u32,
}

impl ExecutionContext {
    pub const MAX_ROWS_LIMIT: u32 = 100_000;
    pub const TIMEOUT_LIMIT_SECONDS: u32 = 3_600;

    fn default_max_rows() -> u32 {
        1_000
    }

    fn default_timeout_seconds() -> u32 {
        30
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            max_rows: Self::default_max_rows(),
            timeout_seconds: Self::default_timeout_seconds(),
        }
    }
}

/// A natural-language request for an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub request_id: RequestId,
    pub execution_id: ExecutionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub user_context: UserContext,
    pub user_prompt: String,
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub selected_schema_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context: Option<ExecutionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<ModelName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub include_visualization: bool,
}

impl AnalyzeRequest {
    /// Checks every inbound rule and reports all violations together.
    ///
    /// Returns [`PlanningError::Validation`] when any rule fails.
    pub fn validate(&self) -> Result<(), PlanningError> {
        let mut problems = Vec::new();

        if self.request_id.as_str().trim().is_empty() {
            problems.push("request_id must not be empty".to_string());
        }
        if self.execution_id.as_str().trim().is_empty() {
            problems.push("execution_id must not be empty".to_string());
        }
        if self.user_prompt.trim().is_empty() {
            problems.push("user_prompt must not be empty".to_string());
        }
        if self.data_sources.is_empty() {
            problems.push("at least one data source is required".to_string());
        }
        let unsupported: Vec<String> = self
            .data_sources
            .iter()
            .filter(|ds| !is_supported_source_type(&ds.source_type))
            .map(|ds| format!("'{}' (data_source_id: {})", ds.source_type, ds.data_source_id))
            .collect();
        if !unsupported.is_empty() {
            problems.push(format!(
                "unsupported data source type(s): {}",
                unsupported.join(", ")
            ));
        }
        if self
            .ai_model
            .as_ref()
            .is_some_and(|m| m.as_str().trim().is_empty())
        {
            problems.push("ai_model must not be empty when supplied".to_string());
        }
        if let Some(t) = self.temperature {
            if Temperature::new(t).is_none() {
                problems.push(format!("temperature {t} is outside [0.0, 2.0]"));
            }
        }
        if let Some(ctx) = &self.execution_context {
            if !(1..=ExecutionContext::MAX_ROWS_LIMIT).contains(&ctx.max_rows) {
                problems.push(format!(
                    "execution_context.max_rows {} is outside [1, {}]",
                    ctx.max_rows,
                    ExecutionContext::MAX_ROWS_LIMIT
                ));
            }
            if !(1..=ExecutionContext::TIMEOUT_LIMIT_SECONDS).contains(&ctx.timeout_seconds) {
                problems.push(format!(
                    "execution_context.timeout_seconds {} is outside [1, {}]",
                    ctx.timeout_seconds,
                    ExecutionContext::TIMEOUT_LIMIT_SECONDS
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PlanningError::Validation {
                message: problems.join("; "),
            })
        }
    }

    /// Execution limits, with defaults applied.
    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context.unwrap_or_default()
    }

    /// Time budget for producing the plan.
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(u64::from(self.execution_context().timeout_seconds))
    }

    /// Sampling temperature, defaulting when absent.
    ///
    /// Call after [`AnalyzeRequest::validate`]; an out-of-range value falls
    /// back to the default.
    pub fn temperature(&self) -> Temperature {
        self.temperature
            .and_then(Temperature::new)
            .unwrap_or_default()
    }

    /// The data source stages plan against (the first one listed).
    pub fn primary_source(&self) -> Option<&DataSource> {
        self.data_sources.first()
    }
}
