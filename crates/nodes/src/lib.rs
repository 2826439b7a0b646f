//! planforge orchestration: the resilience and coordination layer.
//!
//! This crate sequences the planning stages against a completion service and
//! wraps them in the process-wide machinery that keeps the service healthy
//! under load: sliding-window admission, a TTL response cache, bounded retry
//! with back-off, and per-request deadlines.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Components here sequence calls between business
//! logic in the [`pipeline`] crate and the [`pipeline::CompletionService`]
//! port. They contain no transport code of their own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `ServiceConfig`, per-stage retry policies, environment overrides |
//! | [`invoker`] | `ResilientInvoker` retry loop |
//! | [`admission`] | `AdmissionController` sliding-window limiter |
//! | [`cache`] | `ResponseCache` TTL store |
//! | [`maintenance`] | Periodic store sweeps |
//! | [`stages`] | Single-stage execution and error mapping |
//! | [`executor`] | `StagePipeline` and `PipelineReport` |
//! | [`assembler`] | `ResponseAssembler` |
//! | [`prompts`] | `DefaultPromptBuilder` |
//! | [`service`] | `PlanningService` façade |

pub mod admission;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod executor;
pub mod invoker;
pub mod maintenance;
pub mod prompts;
pub mod service;
pub mod stages;

#[cfg(test)]
mod testing;

pub use admission::{Admission, AdmissionController};
pub use assembler::ResponseAssembler;
pub use cache::{CacheLookup, ResponseCache};
pub use config::{CacheConfig, ConfigError, RateLimitConfig, ServiceConfig, StageRetryPolicies};
pub use executor::{PipelineReport, StagePipeline};
pub use invoker::{InvokeError, Invoked, ResilientInvoker};
pub use maintenance::MaintenanceHandle;
pub use prompts::DefaultPromptBuilder;
pub use service::{BackgroundTasks, EnvelopeCache, PlanningService, RequestRejection};
pub use stages::{StageFailure, StageInputs, StageSuccess};
