use futures::future::BoxFuture;
use uuid::Uuid;

use pricewatch_core::dispatcher::{Assignment, Dispatcher};
use pricewatch_core::engine::{EngineId, RegisterEngineRequest, ScraperEngine};
use pricewatch_core::error::AppError;
use pricewatch_core::executor::EngineExecutor;
use pricewatch_core::job::{CreateScrapeJobRequest, JobStatus, ScrapeJob};
use pricewatch_core::job_store::JobStore;
use pricewatch_core::registry::EngineRegistry;

/// Object-safe view of the dispatcher used by the HTTP handlers, so the
/// router does not depend on which storage backend is running.
pub trait ControlPlane: Send + Sync {
    fn track_product(
        &self,
        request: CreateScrapeJobRequest,
    ) -> BoxFuture<'_, Result<Assignment, AppError>>;

    fn get_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeJob>, AppError>>;

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScrapeJob>, AppError>>;

    fn cancel_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<ScrapeJob, AppError>>;

    fn list_engines(&self) -> BoxFuture<'_, Result<Vec<ScraperEngine>, AppError>>;

    fn register_engine(
        &self,
        request: RegisterEngineRequest,
    ) -> BoxFuture<'_, Result<ScraperEngine, AppError>>;

    fn set_engine_active(
        &self,
        engine_id: EngineId,
        active: bool,
    ) -> BoxFuture<'_, Result<ScraperEngine, AppError>>;
}

impl<R, J, X> ControlPlane for Dispatcher<R, J, X>
where
    R: EngineRegistry,
    J: JobStore,
    X: EngineExecutor,
{
    fn track_product(
        &self,
        request: CreateScrapeJobRequest,
    ) -> BoxFuture<'_, Result<Assignment, AppError>> {
        Box::pin(Dispatcher::track_product(self, request))
    }

    fn get_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<Option<ScrapeJob>, AppError>> {
        Box::pin(self.jobs().get_job(job_id))
    }

    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScrapeJob>, AppError>> {
        Box::pin(self.jobs().list_jobs(status, limit))
    }

    fn cancel_job(&self, job_id: Uuid) -> BoxFuture<'_, Result<ScrapeJob, AppError>> {
        Box::pin(self.cancel(job_id))
    }

    fn list_engines(&self) -> BoxFuture<'_, Result<Vec<ScraperEngine>, AppError>> {
        Box::pin(self.registry().list())
    }

    fn register_engine(
        &self,
        request: RegisterEngineRequest,
    ) -> BoxFuture<'_, Result<ScraperEngine, AppError>> {
        Box::pin(self.registry().register(request))
    }

    fn set_engine_active(
        &self,
        engine_id: EngineId,
        active: bool,
    ) -> BoxFuture<'_, Result<ScraperEngine, AppError>> {
        Box::pin(Dispatcher::set_engine_active(self, engine_id, active))
    }
}
