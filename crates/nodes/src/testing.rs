//! In-memory completion service and fixtures shared by the unit tests and
//! the integration tests under `tests/`.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    AnalyzeRequest, Completion, CompletionError, CompletionRequest, CompletionService, StageName,
    TokenUsage,
};
use serde_json::{json, Value};

/// Answers each stage from a per-stage script, falling back to a canonical
/// valid payload once the script is exhausted. Every call is recorded.
#[derive(Debug, Default)]
pub struct ScriptedService {
    scripts: Mutex<HashMap<StageName, VecDeque<Result<Value, CompletionError>>>>,
    fallback: HashMap<StageName, Value>,
    latency: Mutex<HashMap<StageName, Duration>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedService {
    /// Every stage answers with its canonical payload.
    pub fn happy_path() -> Self {
        let fallback = StageName::ALL
            .iter()
            .map(|stage| (*stage, canonical_payload(*stage)))
            .collect();
        Self {
            fallback,
            ..Self::default()
        }
    }

    /// Queues the next answer for `stage`.
    pub fn script(&self, stage: StageName, answer: Result<Value, CompletionError>) {
        self.script_repeated(stage, 1, answer);
    }

    /// The next `times` calls for `stage` answer with `answer`.
    pub fn script_repeated(
        &self,
        stage: StageName,
        times: usize,
        answer: Result<Value, CompletionError>,
    ) {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.entry(stage).or_default();
        for _ in 0..times {
            queue.push_back(answer.clone());
        }
    }

    /// Makes every call for `stage` take `latency` before answering.
    pub fn set_latency(&self, stage: StageName, latency: Duration) {
        self.latency.lock().unwrap().insert(stage, latency);
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Stages called so far, in call order.
    pub fn stages(&self) -> Vec<StageName> {
        self.calls.lock().unwrap().iter().map(|c| c.stage).collect()
    }

    pub fn calls_for(&self, stage: StageName) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.stage == stage)
            .count()
    }
}

#[async_trait]
impl CompletionService for ScriptedService {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        let stage = request.stage;
        self.calls.lock().unwrap().push(request);
        let latency = self.latency.lock().unwrap().get(&stage).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        let payload = match scripted {
            Some(answer) => answer?,
            None => self
                .fallback
                .get(&stage)
                .cloned()
                .ok_or_else(|| CompletionError::Internal(format!("no script for {stage}")))?,
        };
        Ok(Completion {
            payload,
            usage: TokenUsage::new(120, 80),
            latency_ms: 40,
        })
    }
}

pub fn canonical_payload(stage: StageName) -> Value {
    match stage {
        StageName::Intent => intent_payload(),
        StageName::Governance => governance_payload(),
        StageName::Planning => plan_payload(),
        StageName::Visualization => visualization_payload(),
        StageName::Analysis => analysis_payload(),
    }
}

pub fn intent_payload() -> Value {
    json!({
        "intent_type": "aggregate",
        "intent_summary": "Rank customers by revenue for the current quarter",
        "source_category": "sql",
        "needs_aggregation": true,
        "needs_join": true,
        "needs_time_filter": true,
        "no_rows": 10
    })
}

pub fn governance_payload() -> Value {
    json!({
        "row_filters": ["customers.region = 'US-WEST'"],
        "column_masking_rules": [{
            "column": "customers.email",
            "condition": "always",
            "masking_function": "mask_email"
        }],
        "governance_applied": ["row_level_security", "column_masking"],
        "governance_impact": "Only US-WEST customers are visible; emails are masked",
        "planning_notes": ["Apply the region filter before aggregation"]
    })
}

pub fn plan_payload() -> Value {
    json!({
        "strategy": "pushdown",
        "type": "sql_query",
        "operations": [
            {
                "step": 1,
                "step_id": "revenue_by_customer",
                "operation_type": "read",
                "type": "source_query",
                "description": "Aggregate this quarter's order revenue per customer",
                "data_source_id": 1,
                "compute_type": "source_native",
                "compute_engine": "postgresql",
                "query_payload": {
                    "language": "sql",
                    "dialect": "postgresql",
                    "statement": "SELECT c.id, c.name, SUM(o.total) AS revenue FROM customers c JOIN orders o ON o.customer_id = c.id WHERE c.region = $1 AND o.created_at >= date_trunc('quarter', now()) GROUP BY c.id, c.name ORDER BY revenue DESC LIMIT 10",
                    "parameters": [{ "name": "$1", "value": "US-WEST" }]
                },
                "governance_applied": {
                    "rls_rules": ["customers.region = 'US-WEST'"],
                    "masking_rules": []
                },
                "output_artifact": "top_customers"
            },
            {
                "step": 2,
                "step_id": "format_result",
                "operation_type": "transform",
                "type": "projection",
                "description": "Shape the result for display",
                "data_source_id": 1,
                "compute_type": "in_memory",
                "compute_engine": "planner",
                "dependencies": ["revenue_by_customer"],
                "query": "project(id, name, revenue)",
                "output_artifact": "top_customers_view"
            }
        ]
    })
}

pub fn visualization_payload() -> Value {
    json!({
        "visualizations": [
            {
                "type": "bar",
                "title": "Top 10 customers by revenue",
                "x_axis": "name",
                "y_axis": "revenue",
                "config": { "orientation": "horizontal" },
                "is_primary": true
            },
            {
                "type": "table",
                "title": "Customer revenue detail",
                "config": { "sortable": true, "filterable": true },
                "is_primary": false
            }
        ]
    })
}

pub fn analysis_payload() -> Value {
    json!({
        "confidence": 88,
        "confidence_score": 0.88,
        "explanation": "The plan pushes the aggregation to PostgreSQL and enforces the region filter",
        "reasoning_steps": [
            "Classified the request as an aggregation",
            ["Joined orders to customers", "Filtered by quarter"]
        ],
        "suggestions": ["Index orders.created_at"]
    })
}

/// The "top 10 customers by revenue this quarter" request.
pub fn top_customers_request(request_id: &str) -> AnalyzeRequest {
    serde_json::from_value(json!({
        "request_id": request_id,
        "execution_id": format!("exec-{request_id}"),
        "user_context": {
            "user_id": 7,
            "workspace_id": 3,
            "organization_id": 1,
            "roles": ["analyst", "sales"],
            "permissions": ["read:customers", "read:orders"],
            "attributes": { "assigned_region": "US-WEST" }
        },
        "user_prompt": "Show me top 10 customers by revenue this quarter",
        "data_sources": [{
            "data_source_id": 1,
            "name": "PostgreSQL Production",
            "type": "postgresql",
            "schemas": [{
                "schema_name": "public",
                "tables": [
                    {
                        "table_name": "customers",
                        "row_count": 52000,
                        "columns": [
                            { "column_name": "id", "column_type": "integer", "is_primary_key": true },
                            { "column_name": "name", "column_type": "varchar(255)" },
                            { "column_name": "email", "column_type": "varchar(255)", "pii": true },
                            { "column_name": "region", "column_type": "varchar(32)" }
                        ]
                    },
                    {
                        "table_name": "orders",
                        "row_count": 1250000,
                        "columns": [
                            { "column_name": "id", "column_type": "bigint", "is_primary_key": true },
                            { "column_name": "customer_id", "column_type": "integer", "is_foreign_key": true },
                            { "column_name": "total", "column_type": "decimal(12,2)" },
                            { "column_name": "created_at", "column_type": "timestamptz" }
                        ]
                    }
                ]
            }],
            "governance_policies": {
                "row_level_security": {
                    "enabled": true,
                    "rules": [{ "condition": "region = {user.attributes.assigned_region}" }]
                },
                "column_masking": {
                    "enabled": true,
                    "rules": [{ "column": "email", "masking_function": "mask_email" }]
                }
            }
        }],
        "selected_schema_names": ["public"],
        "execution_context": { "max_rows": 1000, "timeout_seconds": 60 },
        "include_visualization": true
    }))
    .unwrap()
}
