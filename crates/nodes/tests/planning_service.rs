//! End-to-end behaviour of `PlanningService` against a scripted completion
//! service, with tokio's clock paused so TTLs, windows and back-off are
//! deterministic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client, service_with, top_customers_request, ScriptedService};
use nodes::{RequestRejection, ServiceConfig};
use pipeline::{CompletionError, RequestId, ResponseStatus, StageName};
use serde_json::json;
use tokio::time::{advance, Instant};

#[tokio::test(start_paused = true)]
async fn top_customers_request_produces_full_plan() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());

    let envelope = service
        .handle(&client("10.0.0.1"), top_customers_request("req-1"), None)
        .await
        .unwrap();

    assert_eq!(envelope.status, ResponseStatus::Success);
    assert_eq!(envelope.request_id.as_str(), "req-1");
    assert_eq!(envelope.execution_id.as_str(), "exec-req-1");
    assert!(envelope.plan_id.is_some());
    assert!(envelope.error.is_none());

    let plan = envelope.execution_plan.as_ref().unwrap();
    assert_eq!(plan.operations.len(), 2);
    assert_eq!(plan.operations[1].dependencies, vec!["revenue_by_customer"]);
    // The statement is lifted into `query` when the model leaves it empty.
    assert!(plan.operations[0].query.starts_with("SELECT"));

    let visuals = envelope.visualization.as_ref().unwrap();
    assert_eq!(visuals.iter().filter(|v| v.is_primary).count(), 1);

    let governance = envelope.governance.as_ref().unwrap();
    assert_eq!(governance.column_masking_rules.len(), 1);

    assert_eq!(envelope.ai_metadata.confidence, Some(88));
    assert_eq!(envelope.ai_metadata.reasoning_steps.len(), 3);
    assert_eq!(envelope.ai_metadata.input_tokens, 5 * 120);
    assert_eq!(envelope.ai_metadata.output_tokens, 5 * 80);
    assert!(!envelope.ai_metadata.cache_hit);
    assert_eq!(envelope.suggestions, vec!["Index orders.created_at"]);

    let log = scripted.stages();
    assert_eq!(
        &log[..3],
        &[StageName::Intent, StageName::Governance, StageName::Planning]
    );
    assert_eq!(log.len(), 5);
    assert_eq!(scripted.calls_for(StageName::Visualization), 1);
    assert_eq!(scripted.calls_for(StageName::Analysis), 1);
    assert_eq!(envelope.diagnostics.len(), 5);
    assert!(envelope.diagnostics.iter().all(|d| d.success));
}

#[tokio::test(start_paused = true)]
async fn identical_request_within_ttl_is_served_from_cache() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());
    let key = client("10.0.0.2");

    let first = service
        .handle(&key, top_customers_request("req-a"), None)
        .await
        .unwrap();
    let calls_after_first = scripted.calls().len();

    advance(Duration::from_secs(120)).await;
    let second = service
        .handle(&key, top_customers_request("req-b"), None)
        .await
        .unwrap();

    assert!(second.ai_metadata.cache_hit);
    assert_eq!(scripted.calls().len(), calls_after_first);
    assert_eq!(second.request_id, RequestId::new("req-b").unwrap());
    assert_eq!(second.plan_id, first.plan_id);
    assert_eq!(second.execution_plan, first.execution_plan);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_triggers_a_fresh_run() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());
    let key = client("10.0.0.3");

    service
        .handle(&key, top_customers_request("req-a"), None)
        .await
        .unwrap();
    let calls_after_first = scripted.calls().len();

    advance(Duration::from_secs(301)).await;
    let second = service
        .handle(&key, top_customers_request("req-b"), None)
        .await
        .unwrap();

    assert!(second.is_success());
    assert!(!second.ai_metadata.cache_hit);
    assert_eq!(scripted.calls().len(), 2 * calls_after_first);
}

#[tokio::test(start_paused = true)]
async fn sixty_first_request_in_a_window_is_rate_limited() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());
    let key = client("10.0.0.4");

    for i in 0..60 {
        let result = service
            .handle(&key, top_customers_request(&format!("req-{i}")), None)
            .await;
        assert!(result.is_ok(), "request {i} should be admitted");
    }
    // Only the first request reached the stages; the rest were cache hits.
    assert_eq!(scripted.calls_for(StageName::Intent), 1);

    let rejected = service
        .handle(&key, top_customers_request("req-60"), None)
        .await
        .unwrap_err();
    let RequestRejection::RateLimited(rejection) = &rejected else {
        panic!("expected a rate-limit rejection, got {rejected:?}");
    };
    assert_eq!(rejection.limit, 60);
    assert!(rejection.retry_after_secs >= 1 && rejection.retry_after_secs <= 60);
    assert_eq!(rejected.to_error().code(), "RATE_LIMIT_EXCEEDED");

    // Another client is unaffected.
    assert!(service
        .handle(&client("10.0.0.5"), top_customers_request("other"), None)
        .await
        .is_ok());

    advance(Duration::from_secs(61)).await;
    assert!(service
        .handle(&key, top_customers_request("req-61"), None)
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn governance_schema_failure_halts_the_pipeline() {
    let scripted = Arc::new(ScriptedService::happy_path());
    scripted.script_repeated(
        StageName::Governance,
        3,
        Ok(json!({ "row_filters": "not a list" })),
    );
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());
    let started = Instant::now();

    let envelope = service
        .handle(&client("10.0.0.6"), top_customers_request("req-g"), None)
        .await
        .unwrap();

    assert_eq!(envelope.status, ResponseStatus::Failed);
    assert!(envelope.plan_id.is_none());
    let error = envelope.error.as_ref().unwrap();
    assert_eq!(error.code, "PLAN_GENERATION_ERROR");
    assert_eq!(error.stage, Some(StageName::Governance));

    assert_eq!(scripted.calls_for(StageName::Governance), 3);
    assert_eq!(scripted.calls_for(StageName::Planning), 0);
    assert_eq!(scripted.calls_for(StageName::Visualization), 0);
    assert_eq!(scripted.calls_for(StageName::Analysis), 0);

    let intent = &envelope.diagnostics[0];
    assert_eq!(intent.stage, StageName::Intent);
    assert!(intent.success);
    let governance = &envelope.diagnostics[1];
    assert!(!governance.success);
    assert_eq!(governance.attempts, 3);
    // One-second then two-second back-off between the three attempts.
    assert!(started.elapsed() >= Duration::from_secs(3));

    assert!(service.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_transparently() {
    let scripted = Arc::new(ScriptedService::happy_path());
    scripted.script_repeated(
        StageName::Planning,
        2,
        Err(CompletionError::Server {
            status: 503,
            message: "overloaded".into(),
        }),
    );
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());

    let envelope = service
        .handle(&client("10.0.0.7"), top_customers_request("req-t"), None)
        .await
        .unwrap();

    assert!(envelope.is_success());
    assert_eq!(scripted.calls_for(StageName::Planning), 3);
    let planning = envelope
        .diagnostics
        .iter()
        .find(|d| d.stage == StageName::Planning)
        .unwrap();
    assert_eq!(planning.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn visualization_failure_leaves_plan_intact() {
    let scripted = Arc::new(ScriptedService::happy_path());
    scripted.script_repeated(
        StageName::Visualization,
        1,
        Err(CompletionError::InvalidRequest("schema too large".into())),
    );
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());

    let envelope = service
        .handle(&client("10.0.0.8"), top_customers_request("req-v"), None)
        .await
        .unwrap();

    assert!(envelope.is_success());
    assert!(envelope.visualization.is_none());
    assert!(envelope.execution_plan.is_some());
    assert!(envelope.ai_metadata.confidence.is_some());
    let viz = envelope
        .diagnostics
        .iter()
        .find(|d| d.stage == StageName::Visualization)
        .unwrap();
    assert!(!viz.success);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_never_reach_the_completion_service() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());
    let key = client("10.0.0.9");

    let mut unsupported = top_customers_request("req-u");
    unsupported.data_sources[0].source_type = "excel".into();
    let err = service.handle(&key, unsupported, None).await.unwrap_err();
    let error = err.to_error();
    assert_eq!(error.code(), "VALIDATION_ERROR");
    assert!(error.to_string().contains("excel"));

    let mut empty_prompt = top_customers_request("req-e");
    empty_prompt.user_prompt = "   ".into();
    let err = service.handle(&key, empty_prompt, None).await.unwrap_err();
    assert!(matches!(err, RequestRejection::Invalid(_)));

    assert_eq!(scripted.calls().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_reached_during_back_off_is_a_timeout() {
    let scripted = Arc::new(ScriptedService::happy_path());
    scripted.script_repeated(StageName::Governance, 3, Err(CompletionError::Timeout));
    let service = service_with(Arc::clone(&scripted), ServiceConfig::default());

    let deadline = Instant::now() + Duration::from_secs(2);
    let envelope = service
        .handle(
            &client("10.0.0.10"),
            top_customers_request("req-d"),
            Some(deadline),
        )
        .await
        .unwrap();

    assert_eq!(envelope.status, ResponseStatus::Failed);
    let error = envelope.error.as_ref().unwrap();
    assert_eq!(error.code, "TIMEOUT");
    assert_eq!(error.stage, Some(StageName::Governance));
    assert_eq!(scripted.calls_for(StageName::Governance), 2);
    assert_eq!(scripted.calls_for(StageName::Planning), 0);
    assert!(Instant::now() <= deadline);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_admission_window() {
    let scripted = Arc::new(ScriptedService::happy_path());
    let mut config = ServiceConfig::default();
    config.rate_limit.limit = 5;
    let service = service_with(scripted, config);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .handle(
                        &client("10.0.0.11"),
                        top_customers_request(&format!("req-{i}")),
                        None,
                    )
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(RequestRejection::RateLimited(_)) => limited += 1,
            Err(other) => panic!("unexpected rejection {other:?}"),
        }
    }
    assert_eq!(admitted, 5);
    assert_eq!(limited, 7);
}
