use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineId;
use crate::error::AppError;

/// Status of a scrape job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// States in which the job holds one unit of its engine's load.
    pub const HOLDING_LOAD: &'static [JobStatus] = &[JobStatus::Assigned, JobStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn holds_load(&self) -> bool {
        Self::HOLDING_LOAD.contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "assigned" => Ok(JobStatus::Assigned),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No active engine existed at dispatch time.
    NoCapacity,
    /// Every allowed assignment attempt hit an unreachable engine.
    RetriesExhausted,
    /// The engine ran the job and the scrape failed on content.
    ScrapeFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoCapacity => "no_capacity",
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::ScrapeFailed => "scrape_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_capacity" => Ok(FailureReason::NoCapacity),
            "retries_exhausted" => Ok(FailureReason::RetriesExhausted),
            "scrape_failed" => Ok(FailureReason::ScrapeFailed),
            _ => Err(format!("Unknown failure reason: {}", s)),
        }
    }
}

/// Outcome reported back by the engine that executed a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    /// The scrape ran and failed for content reasons. Terminal.
    FailedLogic { message: String },
    /// The engine could not carry the job out. Retried with reselection.
    FailedUnreachable { message: String },
}

/// A scrape job for one tracked product URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub url: String,
    pub email: Option<String>,
    pub status: JobStatus,
    /// Engine of the current assignment, or of the most recent one once the
    /// job has been released or finished.
    pub engine_id: Option<EngineId>,
    /// Number of assignments made so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScrapeJob {
    pub fn can_attempt(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Request to create a new scrape job.
#[derive(Debug, Clone)]
pub struct CreateScrapeJobRequest {
    pub url: String,
    pub email: Option<String>,
    pub max_attempts: Option<u32>,
}

impl CreateScrapeJobRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            email: None,
            max_attempts: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.url.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Product URL must not be empty".into(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(AppError::ValidationError(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Terminal state written by a finishing transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTermination {
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
}

impl JobTermination {
    pub fn succeeded() -> Self {
        Self {
            status: JobStatus::Succeeded,
            failure_reason: None,
            error_message: None,
        }
    }

    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            failure_reason: Some(reason),
            error_message: Some(message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            failure_reason: None,
            error_message: None,
        }
    }
}
