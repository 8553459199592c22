//! Test utilities: mock executor, recording reporter, and fixtures.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::dispatcher::{DispatchEvent, DispatchReporter, Dispatcher};
use crate::engine::{EngineId, RegisterEngineRequest, ScraperEngine};
use crate::error::AppError;
use crate::executor::EngineExecutor;
use crate::job::ScrapeJob;
use crate::memory::{MemoryEngineRegistry, MemoryJobStore};

// ---------------------------------------------------------------------------
// MockExecutor
// ---------------------------------------------------------------------------

/// Recorded hand-off or abort: (engine_id, job_id).
pub type EngineCall = (EngineId, Uuid);

/// Mock executor that accepts jobs unless told otherwise.
#[derive(Clone, Default)]
pub struct MockExecutor {
    /// Queue of responses for `start`. Each call pops the first element.
    /// If empty, the hand-off succeeds unless the engine is unreachable.
    responses: Arc<Mutex<Vec<Result<(), AppError>>>>,
    unreachable: Arc<Mutex<HashSet<EngineId>>>,
    pub started: Arc<Mutex<Vec<EngineCall>>>,
    pub aborted: Arc<Mutex<Vec<EngineCall>>>,
}

impl MockExecutor {
    /// Executor on which every hand-off succeeds.
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<(), AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    /// Executor for which hand-offs to the given engines fail as unreachable.
    pub fn with_unreachable(engines: &[EngineId]) -> Self {
        Self {
            unreachable: Arc::new(Mutex::new(engines.iter().copied().collect())),
            ..Self::default()
        }
    }

    pub fn started_on(&self) -> Vec<EngineId> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|(engine, _)| *engine)
            .collect()
    }
}

impl EngineExecutor for MockExecutor {
    async fn start(&self, engine: &ScraperEngine, job: &ScrapeJob) -> Result<(), AppError> {
        self.started.lock().unwrap().push((engine.id, job.id));

        {
            let mut responses = self.responses.lock().unwrap();
            if !responses.is_empty() {
                return responses.remove(0);
            }
        }

        if self.unreachable.lock().unwrap().contains(&engine.id) {
            return Err(AppError::EngineUnreachable(format!(
                "Connection refused: {}",
                engine.base_url()
            )));
        }
        Ok(())
    }

    async fn abort(&self, engine: &ScraperEngine, job_id: Uuid) -> Result<(), AppError> {
        self.aborted.lock().unwrap().push((engine.id, job_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GatedExecutor
// ---------------------------------------------------------------------------

/// Hand-off parked by a [`GatedExecutor`] until the test answers it.
pub struct PendingHandoff {
    pub engine_id: EngineId,
    pub job_id: Uuid,
    reply: oneshot::Sender<Result<(), AppError>>,
}

impl PendingHandoff {
    /// Complete the parked `start` call with `result`.
    pub fn answer(self, result: Result<(), AppError>) {
        let _ = self.reply.send(result);
    }
}

/// Executor whose `start` calls block until the test answers them, for
/// interleaving cancels and reports with an in-flight hand-off.
#[derive(Clone)]
pub struct GatedExecutor {
    handoffs: mpsc::UnboundedSender<PendingHandoff>,
    pub aborted: Arc<Mutex<Vec<EngineCall>>>,
}

impl GatedExecutor {
    /// The receiver yields each hand-off as it reaches the executor.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingHandoff>) {
        let (handoffs, rx) = mpsc::unbounded_channel();
        let executor = Self {
            handoffs,
            aborted: Arc::default(),
        };
        (executor, rx)
    }
}

impl EngineExecutor for GatedExecutor {
    async fn start(&self, engine: &ScraperEngine, job: &ScrapeJob) -> Result<(), AppError> {
        let (reply, answer) = oneshot::channel();
        let handoff = PendingHandoff {
            engine_id: engine.id,
            job_id: job.id,
            reply,
        };
        if self.handoffs.send(handoff).is_err() {
            return Err(AppError::EngineUnreachable("hand-off gate closed".into()));
        }
        answer
            .await
            .unwrap_or_else(|_| Err(AppError::EngineUnreachable("hand-off dropped".into())))
    }

    async fn abort(&self, engine: &ScraperEngine, job_id: Uuid) -> Result<(), AppError> {
        self.aborted.lock().unwrap().push((engine.id, job_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock dispatch reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == label)
            .count()
    }
}

impl DispatchReporter for MockReporter {
    fn report(&self, event: DispatchEvent<'_>) {
        let label = match &event {
            DispatchEvent::JobSubmitted { .. } => "JobSubmitted",
            DispatchEvent::ReserveConflict { .. } => "ReserveConflict",
            DispatchEvent::JobAssigned { .. } => "JobAssigned",
            DispatchEvent::NoCapacity { .. } => "NoCapacity",
            DispatchEvent::HandoffFailed { .. } => "HandoffFailed",
            DispatchEvent::EngineReportedUnreachable { .. } => "EngineReportedUnreachable",
            DispatchEvent::JobFinished { .. } => "JobFinished",
            DispatchEvent::RetriesExhausted { .. } => "RetriesExhausted",
            DispatchEvent::StaleCompletion { .. } => "StaleCompletion",
            DispatchEvent::JobCancelled { .. } => "JobCancelled",
            DispatchEvent::AccountingViolation { .. } => "AccountingViolation",
            DispatchEvent::CompletionLoopStarted => "CompletionLoopStarted",
            DispatchEvent::CompletionLoopStopped { .. } => "CompletionLoopStopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

pub type MemoryDispatcher = Dispatcher<MemoryEngineRegistry, MemoryJobStore, MockExecutor>;

/// Dispatcher over fresh in-memory storage.
pub fn memory_dispatcher(executor: MockExecutor, config: DispatchConfig) -> MemoryDispatcher {
    Dispatcher::new(
        MemoryEngineRegistry::new(),
        MemoryJobStore::new(),
        executor,
        config,
    )
}

/// Registration request for `engine-{n}` on `127.0.0.1:{8000 + n}`.
pub fn engine_request(n: i64) -> RegisterEngineRequest {
    RegisterEngineRequest::new(
        format!("engine-{n}"),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        8000 + n as u16,
    )
}

/// Create a dummy engine snapshot for selection tests.
pub fn make_test_engine(id: i64, task_count: u32, active: bool) -> ScraperEngine {
    ScraperEngine {
        id: EngineId(id),
        name: format!("engine-{id}"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 8000 + id as u16,
        active,
        task_count,
        updated_at: Utc::now(),
    }
}
