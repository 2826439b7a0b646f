//! The planning service façade.
//!
//! `handle` implements the request flow: validate, admit, look up the cache,
//! run the pipeline on a miss, store a successful result, and assemble the
//! envelope. Admission is checked exactly once per request, before the cache
//! lookup.

use std::sync::Arc;

use pipeline::{
    AnalyzeRequest, ClientKey, CompletionService, CorrelationId, PlanningError, PromptBuilder,
    RateLimitRejection, RequestFingerprint, ResponseEnvelope,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument};

use crate::admission::{Admission, AdmissionController};
use crate::assembler::ResponseAssembler;
use crate::cache::{CacheLookup, ResponseCache};
use crate::config::ServiceConfig;
use crate::executor::StagePipeline;
use crate::maintenance::MaintenanceHandle;
use crate::prompts::DefaultPromptBuilder;
use crate::stages::{millis, StageInputs};

/// Shared cache of successful envelopes.
pub type EnvelopeCache = ResponseCache<ResponseEnvelope>;

/// Requests turned away before any stage ran.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestRejection {
    /// The request failed validation.
    #[error("{0}")]
    Invalid(PlanningError),

    /// The client is over its admission limit.
    #[error("Rate limit exceeded; retry after {}s", .0.retry_after_secs)]
    RateLimited(RateLimitRejection),
}

impl RequestRejection {
    /// The equivalent [`PlanningError`].
    pub fn to_error(&self) -> PlanningError {
        match self {
            RequestRejection::Invalid(err) => err.clone(),
            RequestRejection::RateLimited(rejection) => rejection.to_error(),
        }
    }
}

/// Background sweeps of the service's stores.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<MaintenanceHandle>,
}

impl BackgroundTasks {
    /// Stops every sweep and waits for it to finish.
    pub async fn shutdown(self) {
        for handle in self.handles {
            handle.shutdown().await;
        }
    }
}

/// Entry point for planning requests.
#[derive(Debug, Clone)]
pub struct PlanningService {
    config: ServiceConfig,
    admission: Arc<AdmissionController>,
    cache: Arc<EnvelopeCache>,
    pipeline: StagePipeline,
    assembler: ResponseAssembler,
}

impl PlanningService {
    /// Creates a service with its own stores and the default prompt builder.
    pub fn new(config: ServiceConfig, completion: Arc<dyn CompletionService>) -> Self {
        let admission = Arc::new(AdmissionController::new(config.rate_limit));
        let cache = Arc::new(ResponseCache::new(config.cache));
        let pipeline = StagePipeline::new(
            completion,
            Arc::new(DefaultPromptBuilder),
            config.retry.clone(),
        );
        Self {
            config,
            admission,
            cache,
            pipeline,
            assembler: ResponseAssembler,
        }
    }

    /// Replaces the prompt builder.
    #[must_use]
    pub fn with_prompt_builder(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.pipeline = self.pipeline.with_prompts(prompts);
        self
    }

    /// Uses externally owned stores, e.g. to share them between services.
    #[must_use]
    pub fn with_stores(
        mut self,
        admission: Arc<AdmissionController>,
        cache: Arc<EnvelopeCache>,
    ) -> Self {
        self.admission = admission;
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn cache(&self) -> &Arc<EnvelopeCache> {
        &self.cache
    }

    /// Starts the periodic sweeps of both stores.
    pub fn spawn_maintenance(&self) -> BackgroundTasks {
        let period = self.config.maintenance_interval;
        BackgroundTasks {
            handles: vec![
                self.admission.spawn_maintenance(period),
                self.cache.spawn_maintenance(period),
            ],
        }
    }

    /// Handles one request from `client_key`.
    ///
    /// The deadline defaults to now plus the request's
    /// `execution_context.timeout_seconds`. Pipeline failures are returned
    /// as a failed envelope; only validation and admission rejections are
    /// errors.
    pub async fn handle(
        &self,
        client_key: &ClientKey,
        request: AnalyzeRequest,
        deadline: Option<Instant>,
    ) -> Result<ResponseEnvelope, RequestRejection> {
        let correlation_id = CorrelationId::new_random();
        let span = info_span!(
            "analyze",
            request_id = %request.request_id,
            client_key = %client_key,
            %correlation_id,
        );
        self.handle_inner(client_key, request, deadline, correlation_id)
            .instrument(span)
            .await
    }

    async fn handle_inner(
        &self,
        client_key: &ClientKey,
        request: AnalyzeRequest,
        deadline: Option<Instant>,
        correlation_id: CorrelationId,
    ) -> Result<ResponseEnvelope, RequestRejection> {
        let started = Instant::now();

        request.validate().map_err(|err| {
            info!(error = %err, "Request rejected by validation");
            RequestRejection::Invalid(err)
        })?;

        if let Admission::Rejected { retry_after } = self.admission.admit(client_key, started) {
            info!(retry_after_ms = millis(retry_after), "Request rejected by rate limit");
            return Err(RequestRejection::RateLimited(
                self.admission.rejection(retry_after),
            ));
        }

        let fingerprint = RequestFingerprint::of(&request, self.config.default_model.as_str());
        if let CacheLookup::Hit(cached) = self.cache.get(&fingerprint, started) {
            let lookup_ms = millis(started.elapsed());
            info!(fingerprint = fingerprint.short(), lookup_ms, "Serving cached plan");
            return Ok(cached.restamped_for_cache_hit(
                request.request_id.clone(),
                request.execution_id.clone(),
                lookup_ms,
            ));
        }
        debug!(fingerprint = fingerprint.short(), "Cache miss");

        let model = request
            .ai_model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let deadline = deadline.unwrap_or_else(|| started + request.time_budget());
        let inputs = StageInputs {
            request: &request,
            model: &model,
            temperature: request.temperature(),
            deadline,
            correlation_id,
        };

        let report = self.pipeline.execute(inputs).await;
        let envelope = self.assembler.assemble(
            &request,
            &model,
            report,
            correlation_id,
            started.elapsed(),
        );

        if envelope.is_success() {
            self.cache
                .put(fingerprint, envelope.clone(), self.cache.default_ttl(), Instant::now());
            info!(
                generation_time_ms = envelope.ai_metadata.generation_time_ms,
                "Plan generated"
            );
        } else if let Some(error) = &envelope.error {
            info!(code = %error.code, stage = ?error.stage, "Plan generation failed");
        }

        Ok(envelope)
    }
}
