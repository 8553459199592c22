use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pricewatch_core::dispatcher::Assignment;
use pricewatch_core::engine::ScraperEngine;
use pricewatch_core::job::{JobOutcome, ScrapeJob};

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct TrackProductRequest {
    /// Product page to scrape.
    pub url: String,
    /// Owner to notify about price changes.
    pub email: Option<String>,
    /// Overrides the configured assignment attempt bound.
    pub max_attempts: Option<u32>,
}

/// Outcome of the initial dispatch decision for a tracked product.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TrackResponse {
    pub job_id: Uuid,
    pub status: String,
    /// Engine the job was handed to; `null` when it was not dispatched.
    pub engine: Option<EngineResponse>,
    pub attempts: u32,
    pub failure_reason: Option<String>,
    pub error_message: Option<String>,
}

impl From<Assignment> for TrackResponse {
    fn from(assignment: Assignment) -> Self {
        let job = assignment.job;
        Self {
            job_id: job.id,
            status: job.status.to_string(),
            engine: assignment.engine.map(EngineResponse::from),
            attempts: job.attempts,
            failure_reason: job.failure_reason.map(|r| r.to_string()),
            error_message: job.error_message,
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub url: String,
    pub email: Option<String>,
    pub status: String,
    pub engine_id: Option<i64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub failure_reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ScrapeJob> for JobResponse {
    fn from(job: ScrapeJob) -> Self {
        Self {
            id: job.id,
            url: job.url,
            email: job.email,
            status: job.status.to_string(),
            engine_id: job.engine_id.map(|id| id.0),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            failure_reason: job.failure_reason.map(|r| r.to_string()),
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            assigned_at: job.assigned_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Completion reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded,
    /// The scrape ran and failed; not retried.
    FailedLogic,
    /// The engine could not run the job; it is reassigned.
    FailedUnreachable,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CompletionRequest {
    pub outcome: OutcomeKind,
    pub message: Option<String>,
}

impl From<CompletionRequest> for JobOutcome {
    fn from(request: CompletionRequest) -> Self {
        let message = request
            .message
            .unwrap_or_else(|| "no details reported".to_string());
        match request.outcome {
            OutcomeKind::Succeeded => JobOutcome::Succeeded,
            OutcomeKind::FailedLogic => JobOutcome::FailedLogic { message },
            OutcomeKind::FailedUnreachable => JobOutcome::FailedUnreachable { message },
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CompletionAccepted {
    pub job_id: Uuid,
    pub queued: bool,
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EngineResponse {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub active: bool,
    pub task_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<ScraperEngine> for EngineResponse {
    fn from(engine: ScraperEngine) -> Self {
        Self {
            id: engine.id.0,
            name: engine.name,
            host: engine.host.to_string(),
            port: engine.port,
            active: engine.active,
            task_count: engine.task_count,
            updated_at: engine.updated_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct EngineListResponse {
    pub engines: Vec<EngineResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterEngineBody {
    pub name: String,
    /// IPv4 or IPv6 address.
    pub host: String,
    pub port: u16,
    /// Defaults to `false`; the health checker activates the engine.
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SetActiveRequest {
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    /// `postgres` or `memory`.
    pub storage: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
