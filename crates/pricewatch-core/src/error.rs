use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineId;

/// Application-wide error types for pricewatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// The engine could not be reached (connection refused, DNS, 5xx).
    #[error("Engine unreachable: {0}")]
    EngineUnreachable(String),

    /// The engine ran (or rejected) the job and the scrape itself failed.
    #[error("Scrape failed: {0}")]
    ScrapeFailed(String),

    /// Request to an engine timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// An operation targeted an engine id the registry does not know.
    #[error("Accounting error: unknown engine {0}")]
    UnknownEngine(EngineId),

    /// A decrement would have taken an engine's task count below zero.
    #[error("Accounting error: task count underflow on engine {0}")]
    LoadUnderflow(EngineId),

    /// An operation targeted a job id the job store does not know.
    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    /// The job is not in a state that allows the requested transition.
    #[error("Job conflict: {0}")]
    JobConflict(String),

    /// Engine or job input failed validation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP plumbing failed outside of an engine call (client construction, bad URL).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if dispatch should release the engine and reselect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::EngineUnreachable(_) | AppError::Timeout(_))
    }

    /// Returns true if this error means the load counters have drifted from
    /// the jobs that actually hold assignments.
    pub fn is_accounting_error(&self) -> bool {
        matches!(
            self,
            AppError::UnknownEngine(_) | AppError::LoadUnderflow(_) | AppError::UnknownJob(_)
        )
    }
}
