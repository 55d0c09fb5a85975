//! Error types for the copilot pipeline.
//!
//! The taxonomy mirrors how failures are scoped at runtime: input and
//! configuration problems are fatal before any session work starts,
//! generation and schema failures abort only their enclosing operation,
//! and store errors are fatal only when the initial corpus cannot load.

use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CopilotError>;

#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    /// Missing or unreadable change request / context file.
    #[error("input error: {0}")]
    Input(String),

    /// Missing required external configuration (API key, schema file, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model call or JSON parse failed after the retry budget was exhausted.
    #[error("generation failed after {attempts} attempts: {detail}")]
    Generation { attempts: u32, detail: String },

    /// Parseable but schema-invalid model output after the retry budget
    /// was exhausted. Carries the last validation error detail.
    #[error("schema validation failed after {attempts} attempts: {detail}")]
    SchemaValidation { attempts: u32, detail: String },

    /// A referenced prompt template file does not exist. Templates have
    /// no inline fallback.
    #[error("prompt template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("retriever error: {0}")]
    Retriever(#[from] RetrieverError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Terminal failure of a processing run. The error report was still
    /// written; its path is embedded so callers can surface it.
    #[error("run failed: {detail} (error report: {})", .report.display())]
    RunFailed { detail: String, report: PathBuf },
}

/// Errors from the test case document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("test case not found: {0}")]
    NotFound(String),

    #[error("test case {id} is not valid against the schema: {detail}")]
    Invalid { id: String, detail: String },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed test case document {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Errors from the relevance retriever.
#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    /// `retrieve` was called before `fit`.
    #[error("retriever has not been fitted; call fit() with a corpus first")]
    NotFitted,
}
