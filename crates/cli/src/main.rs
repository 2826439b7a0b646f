//! planforge CLI entry point.
//!
//! This binary is the composition root. It:
//!
//! 1. parses arguments and loads `ServiceConfig` and `ProviderConfig` from the
//!    environment,
//! 2. wires `tracing-subscriber`, with an OpenTelemetry OTLP exporter when
//!    `OTEL_EXPORTER_OTLP_ENDPOINT` is set,
//! 3. builds the completion provider and the shared admission and cache
//!    stores, and injects them into a `PlanningService`,
//! 4. runs the chosen command and prints JSON to stdout.
//!
//! Exit status: 0 when every envelope succeeded, 1 when any envelope failed,
//! 2 when a request was rejected before planning.

mod args;
mod telemetry;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use llm::{OpenAiCompatibleProvider, ProviderConfig};
use nodes::{AdmissionController, EnvelopeCache, PlanningService, RequestRejection, ServiceConfig};
use pipeline::{
    AnalysisOutput, AnalyzeRequest, ClientKey, CorrelationId, ErrorBody, ExecutionPlan,
    GovernanceOutput, IntentOutput, StageName, StageOutput, VisualizationOutput,
};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let guard = match telemetry::init(cli.log_format, cli.otlp_endpoint.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "planforge failed");
            ExitCode::FAILURE
        }
    };
    guard.shutdown();
    code
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Analyze {
            request,
            client_key,
            repeat,
        } => analyze(&request, &client_key, repeat).await,
        Command::Schema { stage } => {
            let schema = match StageName::from(stage) {
                StageName::Intent => IntentOutput::output_schema(),
                StageName::Governance => GovernanceOutput::output_schema(),
                StageName::Planning => ExecutionPlan::output_schema(),
                StageName::Visualization => VisualizationOutput::output_schema(),
                StageName::Analysis => AnalysisOutput::output_schema(),
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn analyze(path: &Path, client_key: &str, repeat: u32) -> Result<ExitCode> {
    let config = ServiceConfig::from_env().context("invalid service configuration")?;
    config.validate().context("invalid service configuration")?;
    let provider_config = ProviderConfig::from_env().context("invalid provider configuration")?;
    let provider =
        OpenAiCompatibleProvider::new(provider_config).context("failed to build completion provider")?;

    let client_key = ClientKey::new(client_key).context("client key must not be empty")?;
    let request = read_request(path).await?;

    let admission = Arc::new(AdmissionController::new(config.rate_limit));
    let cache = Arc::new(EnvelopeCache::new(config.cache));
    let service =
        PlanningService::new(config, Arc::new(provider)).with_stores(admission, cache);
    let background = service.spawn_maintenance();

    info!(
        request_id = %request.request_id,
        model = %service.config().default_model,
        repeat,
        "Planning request"
    );

    let mut code = ExitCode::SUCCESS;
    for _ in 0..repeat {
        match service.handle(&client_key, request.clone(), None).await {
            Ok(envelope) => {
                if !envelope.is_success() {
                    code = ExitCode::from(1);
                }
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            }
            Err(rejection) => {
                warn!(error = %rejection, "Request rejected");
                println!("{}", serde_json::to_string_pretty(&rejection_body(&rejection))?);
                code = ExitCode::from(2);
                break;
            }
        }
    }

    background.shutdown().await;
    Ok(code)
}

async fn read_request(path: &Path) -> Result<AnalyzeRequest> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read request file {}", path.display()))?
    };
    serde_json::from_str(&raw).context("request is not a valid analyze request")
}

fn rejection_body(rejection: &RequestRejection) -> serde_json::Value {
    let error = ErrorBody::from_error(&rejection.to_error(), CorrelationId::new_random());
    match rejection {
        RequestRejection::RateLimited(limit) => json!({
            "status": "failed",
            "error": error,
            "retry_after_secs": limit.retry_after_secs,
            "limit": limit.limit,
            "window_secs": limit.window_secs,
        }),
        RequestRejection::Invalid(_) => json!({ "status": "failed", "error": error }),
    }
}
