//! Language model integration.
//!
//! `client` holds the transport (an OpenRouter-compatible chat completion
//! API behind the `ChatBackend` trait), `models` the tier/cost tables,
//! `parse` the defensive JSON extraction, and `generate` the three
//! schema-validated generation operations with their retry discipline.

pub mod client;
pub mod generate;
pub mod models;
pub mod parse;

pub use client::{ChatBackend, ChatCompletion, CompletionOptions, OpenRouterBackend};
pub use generate::{
    CaseType, GenerationClient, GenerationSettings, ImpactAnalysis, ImpactLevel, ImpactedCase,
    NewCaseSpec, RetryReason,
};
pub use models::{ModelTier, Usage};
