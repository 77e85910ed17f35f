//! Error types for the financial research agent

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {

    // =============================
    // Pipeline Taxonomy
    // =============================

    /// Query failed basic constraints; surfaced before any stage runs.
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// Categorizer faulted; recovered locally by routing to `general`.
    #[error("Classification degraded: {0}")]
    ClassificationDegraded(String),

    #[error("Context incomplete: {assembler} ({reason})")]
    ContextIncomplete { assembler: String, reason: String },

    /// The category requires data that no assembler could supply.
    #[error("Analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Model output invalid: {0}")]
    OutputInvalid(String),

    #[error("Model output rejected: {0}")]
    OutputRejected(String),

    #[error("Request deadline of {0} ms exceeded")]
    DeadlineExceeded(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
