//! Default stage prompt construction.
//!
//! Each stage gets a short role instruction naming the target database and a
//! JSON content block holding exactly the request fields and upstream outputs
//! that stage depends on. The expected output shape travels separately as a
//! JSON Schema, so the instructions do not restate it.

use pipeline::{
    AnalyzeRequest, CompletionError, DataSource, PromptBuilder, StageContext, StageName,
    StagePrompt, NOSQL_SOURCE_TYPES,
};
use serde_json::json;

/// [`PromptBuilder`] used when the composition root supplies no other.
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptBuilder;

impl PromptBuilder for DefaultPromptBuilder {
    fn build(
        &self,
        stage: StageName,
        request: &AnalyzeRequest,
        context: &StageContext,
    ) -> Result<StagePrompt, CompletionError> {
        let source = request
            .primary_source()
            .ok_or_else(|| CompletionError::Internal("request has no data source".into()))?;
        let database = database_display_name(&source.source_type);
        let missing = |e: pipeline::ContextError| CompletionError::Internal(e.to_string());

        let (system_instruction, content) = match stage {
            StageName::Intent => (
                format!(
                    "You are an intent classification agent for {database} databases. \
                     Classify the user's request and estimate how many rows it returns. \
                     The source category is '{}'.",
                    source_category(source)
                ),
                json!({
                    "user_prompt": request.user_prompt,
                    "data_source": source_summary(source),
                    "selected_schema_names": request.selected_schema_names,
                }),
            ),
            StageName::Governance => (
                format!(
                    "You are a data governance agent for {database} databases. \
                     Resolve the row-level security filters and column masking rules \
                     that must apply to this request for this user. Substitute user \
                     attribute placeholders with concrete values."
                ),
                json!({
                    "user_prompt": request.user_prompt,
                    "user_context": request.user_context,
                    "intent": context.require_intent().map_err(missing)?,
                    "governance_policies": source.governance_policies,
                    "data_source": source_summary(source),
                }),
            ),
            StageName::Planning => (
                format!(
                    "You are an execution planning agent for {database} databases. \
                     Produce an ordered execution plan whose steps enforce every \
                     governance rule provided. Do not exceed {} rows.",
                    request.execution_context().max_rows
                ),
                json!({
                    "user_prompt": request.user_prompt,
                    "intent": context.require_intent().map_err(missing)?,
                    "governance": context.require_governance().map_err(missing)?,
                    "data_source": source,
                    "execution_context": request.execution_context(),
                }),
            ),
            StageName::Visualization => (
                format!(
                    "You are a data visualization agent for {database} query results. \
                     Recommend visualizations for the plan's output and mark exactly \
                     one as primary."
                ),
                json!({
                    "user_prompt": request.user_prompt,
                    "intent": context.require_intent().map_err(missing)?,
                    "plan": context.require_plan().map_err(missing)?,
                }),
            ),
            StageName::Analysis => (
                format!(
                    "You are an analysis agent evaluating execution plans for {database} \
                     databases. Score your confidence in the plan, explain it step by \
                     step, and suggest improvements."
                ),
                json!({
                    "user_prompt": request.user_prompt,
                    "intent": context.require_intent().map_err(missing)?,
                    "governance": context.governance(),
                    "plan": context.require_plan().map_err(missing)?,
                    "visualization": context.visualization(),
                }),
            ),
        };

        Ok(StagePrompt {
            system_instruction,
            content: content.to_string(),
        })
    }
}

fn source_category(source: &DataSource) -> &'static str {
    let normalized = source.source_type.trim().to_ascii_lowercase();
    if NOSQL_SOURCE_TYPES.contains(&normalized.as_str()) {
        "non_sql"
    } else {
        "sql"
    }
}

/// Tables and columns without governance detail.
fn source_summary(source: &DataSource) -> serde_json::Value {
    let tables: Vec<_> = source
        .schemas
        .iter()
        .flat_map(|schema| {
            schema.tables.iter().map(move |table| {
                json!({
                    "schema_name": schema.schema_name,
                    "table_name": table.table_name,
                    "row_count": table.row_count,
                    "columns": table
                        .columns
                        .iter()
                        .map(|c| json!({ "name": c.column_name, "type": c.column_type }))
                        .collect::<Vec<_>>(),
                })
            })
        })
        .collect();
    json!({
        "data_source_id": source.data_source_id,
        "name": source.name,
        "type": source.source_type,
        "tables": tables,
    })
}

fn database_display_name(source_type: &str) -> String {
    let name = match source_type.trim().to_ascii_lowercase().as_str() {
        "postgresql" => "PostgreSQL",
        "mysql" => "MySQL",
        "mariadb" => "MariaDB",
        "sqlserver" => "SQL Server",
        "oracle" => "Oracle",
        "snowflake" => "Snowflake",
        "bigquery" => "BigQuery",
        "redshift" => "Redshift",
        "synapse" => "Azure Synapse",
        "databricks" => "Databricks",
        "mongodb" => "MongoDB",
        "cassandra" => "Cassandra",
        "redis" => "Redis",
        "dynamodb" => "DynamoDB",
        "elasticsearch" => "Elasticsearch",
        _ => return source_type.to_string(),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use pipeline::{ContextError, IntentOutput, IntentType, SourceCategory};
    use serde_json::Value;

    use super::*;
    use crate::testing::top_customers_request;

    fn intent() -> IntentOutput {
        IntentOutput {
            intent_type: IntentType::Aggregate,
            intent_summary: "rank customers".into(),
            source_category: SourceCategory::Sql,
            needs_aggregation: true,
            needs_join: false,
            needs_time_filter: true,
            no_rows: 10,
        }
    }

    #[test]
    fn intent_prompt_names_database_and_prompt() {
        let request = top_customers_request("req-12345");
        let prompt = DefaultPromptBuilder
            .build(StageName::Intent, &request, &StageContext::new())
            .unwrap();
        assert!(prompt.system_instruction.contains("PostgreSQL"));
        let content: Value = serde_json::from_str(&prompt.content).unwrap();
        assert_eq!(content["user_prompt"], request.user_prompt.as_str());
        assert_eq!(content["data_source"]["tables"][0]["table_name"], "customers");
    }

    #[test]
    fn governance_prompt_requires_intent() {
        let request = top_customers_request("req-12345");
        let err = DefaultPromptBuilder
            .build(StageName::Governance, &request, &StageContext::new())
            .unwrap_err();
        assert_eq!(
            err,
            CompletionError::Internal(ContextError::Missing(StageName::Intent).to_string())
        );

        let mut context = StageContext::new();
        context.record_intent(intent()).unwrap();
        let prompt = DefaultPromptBuilder
            .build(StageName::Governance, &request, &context)
            .unwrap();
        let content: Value = serde_json::from_str(&prompt.content).unwrap();
        assert_eq!(content["intent"]["intent_type"], "aggregate");
        assert!(content["governance_policies"]["row_level_security"]["enabled"]
            .as_bool()
            .unwrap());
    }

    #[test]
    fn nosql_sources_are_non_sql() {
        let mut request = top_customers_request("req-12345");
        request.data_sources[0].source_type = "MongoDB".into();
        let prompt = DefaultPromptBuilder
            .build(StageName::Intent, &request, &StageContext::new())
            .unwrap();
        assert!(prompt.system_instruction.contains("'non_sql'"));
        assert!(prompt.system_instruction.contains("MongoDB databases"));
    }
}
