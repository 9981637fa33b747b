//! Error types for survey statistics operations

use thiserror::Error;

/// Result type for survey statistics operations
pub type StatsResult<T> = Result<T, StatsError>;

/// Reason reported for work refused or cut short by shutdown
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Error types for dataset ingestion, job submission, and task execution
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{}", SHUTDOWN_MESSAGE)]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl StatsError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new execution error
    pub fn execution<S: Into<String>>(message: S) -> Self {
        Self::Execution(message.into())
    }

    /// Create a new ingest error
    pub fn ingest<S: Into<String>>(message: S) -> Self {
        Self::Ingest(message.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error rejects a submission before a job is created
    pub fn is_submission_error(&self) -> bool {
        matches!(self, StatsError::Validation(_) | StatsError::ShuttingDown)
    }

    /// Get the error category for monitoring/metrics
    pub fn category(&self) -> &'static str {
        match self {
            StatsError::Validation(_) => "validation",
            StatsError::Execution(_) => "execution",
            StatsError::Ingest(_) => "ingest",
            StatsError::Serialization(_) => "serialization",
            StatsError::Configuration(_) => "configuration",
            StatsError::ShuttingDown => "shutting_down",
            StatsError::Internal(_) => "internal",
            StatsError::Io(_) => "io",
            StatsError::Json(_) => "json",
            StatsError::Csv(_) => "csv",
        }
    }

    /// Bare reason string suitable for client-facing payloads.
    ///
    /// Validation and execution reasons are surfaced verbatim; everything
    /// else collapses to its full display form.
    pub fn public_reason(&self) -> String {
        match self {
            StatsError::Validation(msg) => msg.clone(),
            StatsError::Execution(msg) => msg.clone(),
            StatsError::ShuttingDown => SHUTDOWN_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
