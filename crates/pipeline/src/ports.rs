//! Port traits implemented by infrastructure crates.
//!
//! The orchestration layer depends only on these traits. The `llm` crate
//! supplies the production [`CompletionService`]; tests supply scripted ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AnalyzeRequest, CompletionError, ModelName, StageContext, StageName, Temperature, TokenUsage};

// ---------------------------------------------------------------------------
// Completion service
// ---------------------------------------------------------------------------

/// One structured-output completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Stage issuing the call; used for schema naming and telemetry.
    pub stage: StageName,
    /// System instruction for the model.
    pub system_instruction: String,
    /// User content for the model.
    pub content: String,
    /// JSON Schema the payload must conform to.
    pub schema: serde_json::Value,
    pub model: ModelName,
    pub temperature: Temperature,
}

/// A completed call: the raw structured payload plus usage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Parsed JSON payload. Not yet validated against the schema.
    pub payload: serde_json::Value,
    pub usage: TokenUsage,
    /// Round-trip latency reported by the adapter.
    pub latency_ms: u64,
}

/// An opaque remote structured-output completion service.
///
/// Implementations must map every failure to a [`CompletionError`] so the
/// retry loop can classify it; they must not retry internally.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError>;
}

// ---------------------------------------------------------------------------
// Prompt construction
// ---------------------------------------------------------------------------

/// Stage-specific model input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePrompt {
    pub system_instruction: String,
    pub content: String,
}

/// Builds the model input for a stage from the original request and the
/// outputs of the stages that already ran.
///
/// Prompt wording and per-database dialect guidance belong to the
/// implementation; the pipeline only guarantees that `context` holds every
/// output the stage depends on.
pub trait PromptBuilder: Send + Sync {
    fn build(
        &self,
        stage: StageName,
        request: &AnalyzeRequest,
        context: &StageContext,
    ) -> Result<StagePrompt, CompletionError>;
}
