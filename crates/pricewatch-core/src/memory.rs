//! In-process engine registry and job store.
//!
//! The registry is an arena of engine records keyed by id. Each record owns
//! its mutable state behind its own mutex, so load and health updates on
//! different engines never contend; the id map is write-locked only when an
//! engine is registered.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::engine::{EngineId, RegisterEngineRequest, Reservation, ScraperEngine};
use crate::error::AppError;
use crate::job::{CreateScrapeJobRequest, JobStatus, JobTermination, ScrapeJob};
use crate::job_store::JobStore;
use crate::registry::EngineRegistry;

// ---------------------------------------------------------------------------
// MemoryEngineRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct EngineState {
    active: bool,
    task_count: u32,
    updated_at: DateTime<Utc>,
}

/// One engine record. Identity is immutable; load and health live in `state`.
#[derive(Debug)]
struct EngineSlot {
    id: EngineId,
    name: String,
    host: IpAddr,
    port: u16,
    state: Mutex<EngineState>,
}

impl EngineSlot {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(engine_id = %self.id, "Recovered from poisoned engine lock");
            poisoned.into_inner()
        })
    }

    fn view(&self, state: &EngineState) -> ScraperEngine {
        ScraperEngine {
            id: self.id,
            name: self.name.clone(),
            host: self.host,
            port: self.port,
            active: state.active,
            task_count: state.task_count,
            updated_at: state.updated_at,
        }
    }

    fn snapshot(&self) -> ScraperEngine {
        let state = self.lock();
        self.view(&state)
    }
}

#[derive(Debug, Default)]
struct Arena {
    by_id: BTreeMap<EngineId, Arc<EngineSlot>>,
    last_id: i64,
}

/// In-memory [`EngineRegistry`].
#[derive(Debug, Clone, Default)]
pub struct MemoryEngineRegistry {
    arena: Arc<RwLock<Arena>>,
}

impl MemoryEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_arena(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned engine arena");
            poisoned.into_inner()
        })
    }

    fn write_arena(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned engine arena");
            poisoned.into_inner()
        })
    }

    /// Look up a record. The arena lock is released before the caller
    /// touches the record's own lock.
    fn slot(&self, id: EngineId) -> Result<Arc<EngineSlot>, AppError> {
        self.read_arena()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(AppError::UnknownEngine(id))
    }

    fn slots(&self) -> Vec<Arc<EngineSlot>> {
        self.read_arena().by_id.values().cloned().collect()
    }
}

impl EngineRegistry for MemoryEngineRegistry {
    async fn register(&self, request: RegisterEngineRequest) -> Result<ScraperEngine, AppError> {
        request.validate()?;
        let name = request.name.trim().to_string();

        let mut arena = self.write_arena();
        if arena.by_id.values().any(|slot| slot.name == name) {
            return Err(AppError::ValidationError(format!(
                "Engine name '{name}' is already registered"
            )));
        }

        arena.last_id += 1;
        let id = EngineId(arena.last_id);
        let slot = Arc::new(EngineSlot {
            id,
            name,
            host: request.host,
            port: request.port,
            state: Mutex::new(EngineState {
                active: request.active,
                task_count: 0,
                updated_at: Utc::now(),
            }),
        });
        let engine = slot.snapshot();
        arena.by_id.insert(id, slot);
        Ok(engine)
    }

    async fn get(&self, id: EngineId) -> Result<Option<ScraperEngine>, AppError> {
        match self.slot(id) {
            Ok(slot) => Ok(Some(slot.snapshot())),
            Err(AppError::UnknownEngine(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<ScraperEngine>, AppError> {
        Ok(self.slots().iter().map(|slot| slot.snapshot()).collect())
    }

    async fn list_active(&self) -> Result<Vec<ScraperEngine>, AppError> {
        Ok(self
            .slots()
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|engine| engine.active)
            .collect())
    }

    async fn try_reserve(&self, id: EngineId, observed_load: u32) -> Result<Reservation, AppError> {
        let slot = self.slot(id)?;
        let mut state = slot.lock();
        if !state.active || state.task_count != observed_load {
            return Ok(Reservation::Stale(slot.view(&state)));
        }
        state.task_count += 1;
        state.updated_at = Utc::now();
        Ok(Reservation::Reserved(slot.view(&state)))
    }

    async fn increment_load(&self, id: EngineId) -> Result<ScraperEngine, AppError> {
        let slot = self.slot(id)?;
        let mut state = slot.lock();
        state.task_count += 1;
        state.updated_at = Utc::now();
        Ok(slot.view(&state))
    }

    async fn decrement_load(&self, id: EngineId) -> Result<ScraperEngine, AppError> {
        let slot = self.slot(id)?;
        let mut state = slot.lock();
        if state.task_count == 0 {
            return Err(AppError::LoadUnderflow(id));
        }
        state.task_count -= 1;
        state.updated_at = Utc::now();
        Ok(slot.view(&state))
    }

    async fn set_active(&self, id: EngineId, active: bool) -> Result<ScraperEngine, AppError> {
        let slot = self.slot(id)?;
        let mut state = slot.lock();
        state.active = active;
        state.updated_at = Utc::now();
        Ok(slot.view(&state))
    }
}

// ---------------------------------------------------------------------------
// MemoryJobStore
// ---------------------------------------------------------------------------

/// In-memory [`JobStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, ScrapeJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ScrapeJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job store");
            poisoned.into_inner()
        })
    }

    fn transition(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        attempt: Option<u32>,
        apply: impl FnOnce(&mut ScrapeJob),
    ) -> Result<Option<ScrapeJob>, AppError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&job_id).ok_or(AppError::UnknownJob(job_id))?;
        if !from.contains(&job.status) || attempt.is_some_and(|n| job.attempts != n) {
            return Ok(None);
        }
        apply(job);
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}

impl JobStore for MemoryJobStore {
    async fn create_job(&self, request: CreateScrapeJobRequest) -> Result<ScrapeJob, AppError> {
        let now = Utc::now();
        let job = ScrapeJob {
            id: Uuid::new_v4(),
            url: request.url,
            email: request.email,
            status: JobStatus::Pending,
            engine_id: None,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            failure_reason: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            completed_at: None,
        };
        self.lock().insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ScrapeJob>, AppError> {
        Ok(self.lock().get(&job_id).cloned())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeJob>, AppError> {
        let mut jobs: Vec<ScrapeJob> = self
            .lock()
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        Ok(self.lock().values().filter(|j| j.status == status).count() as i64)
    }

    async fn assign_job(
        &self,
        job_id: Uuid,
        engine_id: EngineId,
    ) -> Result<Option<ScrapeJob>, AppError> {
        self.transition(job_id, &[JobStatus::Pending], None, |job| {
            job.status = JobStatus::Assigned;
            job.engine_id = Some(engine_id);
            job.attempts += 1;
            job.assigned_at = Some(Utc::now());
        })
    }

    async fn mark_running(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
    ) -> Result<Option<ScrapeJob>, AppError> {
        self.transition(job_id, &[JobStatus::Assigned], attempt, |job| {
            job.status = JobStatus::Running;
        })
    }

    async fn release_job(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
        error: &str,
    ) -> Result<Option<ScrapeJob>, AppError> {
        self.transition(job_id, JobStatus::HOLDING_LOAD, attempt, |job| {
            job.status = JobStatus::Pending;
            job.error_message = Some(error.to_string());
        })
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        attempt: Option<u32>,
        termination: JobTermination,
    ) -> Result<Option<ScrapeJob>, AppError> {
        self.transition(job_id, from, attempt, |job| {
            job.status = termination.status;
            job.failure_reason = termination.failure_reason;
            if termination.error_message.is_some() {
                job.error_message = termination.error_message;
            }
            job.completed_at = Some(Utc::now());
        })
    }
}
