use std::future::Future;

use uuid::Uuid;

use crate::engine::EngineId;
use crate::error::AppError;
use crate::job::{CreateScrapeJobRequest, JobStatus, JobTermination, ScrapeJob};

/// Storage for scrape jobs.
///
/// Every state change is a conditional transition: it applies only when the
/// job is currently in one of the expected states and returns `Ok(None)`
/// otherwise. The dispatcher relies on this to make sure exactly one caller
/// wins each transition out of an assignment, and therefore exactly one load
/// decrement happens per reservation. Unknown ids yield `UnknownJob`.
///
/// Transitions taking an `attempt` are additionally pinned to one assignment:
/// with `Some(n)` they apply only while the job's `attempts` is still `n`, so
/// a caller holding an older assignment cannot move a job that has since
/// been reassigned.
pub trait JobStore: Send + Sync + Clone + 'static {
    fn create_job(
        &self,
        request: CreateScrapeJobRequest,
    ) -> impl Future<Output = Result<ScrapeJob, AppError>> + Send;

    fn get_job(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// Newest first.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ScrapeJob>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// `Pending → Assigned`: records the engine and bumps `attempts`.
    fn assign_job(
        &self,
        job_id: Uuid,
        engine_id: EngineId,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// `Assigned → Running`, once the engine has accepted the job.
    fn mark_running(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// `Assigned | Running → Pending` after a retryable failure. The engine id
    /// of the released assignment stays on the record.
    fn release_job(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
        error: &str,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// Move the job from one of `from` to the terminal state in `termination`.
    fn finish_job(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        attempt: Option<u32>,
        termination: JobTermination,
    ) -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;
}
