//! planforge completion adapter.
//!
//! Implements [`pipeline::CompletionService`] for OpenAI-compatible chat
//! completions endpoints. Groq is the default target; any endpoint that
//! accepts a `json_schema` response format works.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and status mapping live here. Retry and back-off belong to the caller;
//! the [`pipeline`] crate sees only [`pipeline::CompletionService`].

pub mod config;
pub mod provider;

pub use config::{ProviderConfig, ProviderConfigError, DEFAULT_BASE_URL};
pub use provider::OpenAiCompatibleProvider;
