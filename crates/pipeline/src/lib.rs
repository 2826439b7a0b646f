//! Core planning domain for planforge.
//!
//! This crate contains every domain concept, newtype identifier, shared primitive
//! type, and cross-cutting error type used throughout the planning pipeline.
//! Infrastructure crates implement the traits defined here; they never add
//! domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`RequestId`, `PlanId`, `CorrelationId`, etc.) |
//! | [`types`] | Shared value types (`TokenUsage`, `Temperature`, `Timestamp`) |
//! | [`errors`] | Error taxonomy and `ErrorClassification` |
//! | [`request`] | Inbound `AnalyzeRequest` and its validation |
//! | [`fingerprint`] | Cache key derivation |
//! | [`outputs`] | Typed stage outputs and the parse-then-validate contract |
//! | [`context`] | `StageName`, the append-only `StageContext`, `StageOutcome` |
//! | [`retry`] | `RetryPolicy` values |
//! | [`envelope`] | Outbound `ResponseEnvelope` and `RateLimitRejection` |
//! | [`ports`] | `CompletionService` and `PromptBuilder` traits |

pub mod context;
pub mod envelope;
pub mod errors;
pub mod fingerprint;
pub mod identifiers;
pub mod outputs;
pub mod ports;
pub mod request;
pub mod retry;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use context::{StageContext, StageName, StageOutcome};
pub use envelope::{AiMetadata, ErrorBody, RateLimitRejection, ResponseEnvelope, ResponseStatus};
pub use errors::{CompletionError, ContextError, ErrorClassification, PlanningError};
pub use fingerprint::RequestFingerprint;
pub use identifiers::{ClientKey, CorrelationId, ExecutionId, ModelName, PlanId, RequestId};
pub use outputs::{
    AnalysisOutput, ColumnMaskingRule, CommandStep, ExecutionPlan, GovernanceApplied,
    GovernanceOutput, IntentOutput, IntentType, QueryParameter, QueryPayload, SourceCategory,
    StageOutput, Visualization, VisualizationConfig, VisualizationOutput,
};
pub use ports::{Completion, CompletionRequest, CompletionService, PromptBuilder, StagePrompt};
pub use request::{
    is_supported_source_type, AnalyzeRequest, Column, DataSource, ExecutionContext,
    GovernancePolicies, GovernanceRule, RuleSet, Schema, Table, UserContext, NOSQL_SOURCE_TYPES,
    SQL_SOURCE_TYPES, WAREHOUSE_SOURCE_TYPES,
};
pub use retry::{RetryPolicy, RetryPredicate};
pub use types::{Temperature, Timestamp, TokenCount, TokenUsage};
