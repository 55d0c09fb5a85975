//! QA copilot library crate
//!
//! Exposes the pipeline modules so integration tests and external tooling
//! can drive runs without going through CLI startup.

pub mod config;
pub mod copilot;
pub mod error;
pub mod llm;
pub mod observability;
pub mod prompts;
pub mod report;
pub mod retrieve;
pub mod schema;
pub mod store;
