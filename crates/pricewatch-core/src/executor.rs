use std::future::Future;

use uuid::Uuid;

use crate::engine::ScraperEngine;
use crate::error::AppError;
use crate::job::ScrapeJob;

/// Hands jobs to scraper engines.
///
/// The scrape itself runs on the engine; completion comes back later as a
/// report. `start` returns as soon as the engine has accepted the job.
pub trait EngineExecutor: Send + Sync + Clone + 'static {
    /// Ask `engine` to run `job`.
    ///
    /// Errors for which [`AppError::is_retryable`] holds mean the engine could
    /// not take the job and another engine may be tried.
    fn start(
        &self,
        engine: &ScraperEngine,
        job: &ScrapeJob,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Ask `engine` to stop working on a job that was cancelled.
    fn abort(
        &self,
        engine: &ScraperEngine,
        job_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
