use std::future::Future;

use crate::engine::{EngineId, RegisterEngineRequest, Reservation, ScraperEngine};
use crate::error::AppError;

/// Source of truth for scraper engines and their load counters.
///
/// Every mutation is atomic with respect to other writers of the same
/// engine record. Implementations must not serialize writes to different
/// engines behind one lock.
pub trait EngineRegistry: Send + Sync + Clone + 'static {
    fn register(
        &self,
        request: RegisterEngineRequest,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send;

    fn get(
        &self,
        id: EngineId,
    ) -> impl Future<Output = Result<Option<ScraperEngine>, AppError>> + Send;

    /// All engines, ascending id.
    fn list(&self) -> impl Future<Output = Result<Vec<ScraperEngine>, AppError>> + Send;

    /// Engines with `active = true`. Order is unspecified.
    fn list_active(&self) -> impl Future<Output = Result<Vec<ScraperEngine>, AppError>> + Send;

    /// Increment the load counter only if the engine is still active and its
    /// counter still equals `observed_load`.
    ///
    /// Returns `UnknownEngine` if the id does not exist.
    fn try_reserve(
        &self,
        id: EngineId,
        observed_load: u32,
    ) -> impl Future<Output = Result<Reservation, AppError>> + Send;

    /// Unconditional atomic increment.
    fn increment_load(
        &self,
        id: EngineId,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send;

    /// Atomic decrement. Fails with `LoadUnderflow` instead of going below zero.
    fn decrement_load(
        &self,
        id: EngineId,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send;

    fn set_active(
        &self,
        id: EngineId,
        active: bool,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send;

    fn mark_active(
        &self,
        id: EngineId,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send {
        self.set_active(id, true)
    }

    fn mark_inactive(
        &self,
        id: EngineId,
    ) -> impl Future<Output = Result<ScraperEngine, AppError>> + Send {
        self.set_active(id, false)
    }
}
