//! Scrape-job dispatch.
//!
//! # Assignment lifecycle
//!
//! ```text
//! Pending --reserve + assign--> Assigned --engine accepted--> Running
//!    ^                              |                            |
//!    +------ unreachable -----------+----------------------------+
//!                                   |                            |
//!                                   +--> Succeeded | Failed | Cancelled
//! ```
//!
//! A reservation increments the chosen engine's `task_count`. Every path out
//! of `Assigned`/`Running` goes through a conditional job-store transition,
//! and only the caller that wins that transition decrements the counter, so
//! each reservation is released exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::balancer::LoadBalancer;
use crate::config::DispatchConfig;
use crate::engine::{EngineId, Reservation, ScraperEngine};
use crate::error::AppError;
use crate::executor::EngineExecutor;
use crate::job::{
    CreateScrapeJobRequest, FailureReason, JobOutcome, JobStatus, JobTermination, ScrapeJob,
};
use crate::job_store::JobStore;
use crate::registry::EngineRegistry;

/// Rounds `cancel` retries when the job keeps moving between states.
const CANCEL_ROUNDS: usize = 3;

/// Result of a dispatch decision.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job: ScrapeJob,
    /// Engine the job was handed to, or `None` if it was not handed off.
    pub engine: Option<ScraperEngine>,
}

impl Assignment {
    /// The job was handed to an engine.
    pub fn is_assigned(&self) -> bool {
        self.engine.is_some()
    }
}

/// Completion report posted by the engine that executed a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Events emitted by the dispatcher for monitoring/logging.
#[derive(Debug, Clone)]
pub enum DispatchEvent<'a> {
    JobSubmitted {
        job_id: Uuid,
        url: &'a str,
    },
    ReserveConflict {
        job_id: Uuid,
        engine_id: EngineId,
        observed: u32,
        current: u32,
        active: bool,
    },
    JobAssigned {
        job_id: Uuid,
        engine: &'a ScraperEngine,
        attempt: u32,
    },
    NoCapacity {
        job_id: Uuid,
    },
    HandoffFailed {
        job_id: Uuid,
        engine_id: EngineId,
        error: &'a str,
        will_retry: bool,
    },
    EngineReportedUnreachable {
        job_id: Uuid,
        engine_id: Option<EngineId>,
        error: &'a str,
    },
    JobFinished {
        job_id: Uuid,
        engine_id: Option<EngineId>,
        status: JobStatus,
    },
    RetriesExhausted {
        job_id: Uuid,
        attempts: u32,
    },
    StaleCompletion {
        job_id: Uuid,
        status: JobStatus,
    },
    JobCancelled {
        job_id: Uuid,
        engine_id: Option<EngineId>,
    },
    AccountingViolation {
        engine_id: Option<EngineId>,
        job_id: Option<Uuid>,
        error: &'a AppError,
    },
    CompletionLoopStarted,
    CompletionLoopStopped {
        in_flight: usize,
    },
}

/// Trait for receiving dispatch events (decoupled logging).
pub trait DispatchReporter: Send + Sync {
    fn report(&self, event: DispatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatchReporter;

impl DispatchReporter for TracingDispatchReporter {
    fn report(&self, event: DispatchEvent<'_>) {
        match event {
            DispatchEvent::JobSubmitted { job_id, url } => {
                tracing::info!(%job_id, %url, "Job submitted");
            }
            DispatchEvent::ReserveConflict {
                job_id,
                engine_id,
                observed,
                current,
                active,
            } => {
                tracing::debug!(
                    %job_id, %engine_id, observed, current, active,
                    "Engine changed since snapshot, reselecting"
                );
            }
            DispatchEvent::JobAssigned {
                job_id,
                engine,
                attempt,
            } => {
                tracing::info!(
                    %job_id,
                    engine_id = %engine.id,
                    engine = %engine.name,
                    task_count = engine.task_count,
                    attempt,
                    "Job assigned"
                );
            }
            DispatchEvent::NoCapacity { job_id } => {
                tracing::warn!(%job_id, "No active scraper engine available");
            }
            DispatchEvent::HandoffFailed {
                job_id,
                engine_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%job_id, %engine_id, %error, %will_retry, "Hand-off failed");
            }
            DispatchEvent::EngineReportedUnreachable {
                job_id,
                engine_id,
                error,
            } => {
                tracing::warn!(%job_id, ?engine_id, %error, "Engine reported job unreachable");
            }
            DispatchEvent::JobFinished {
                job_id,
                engine_id,
                status,
            } => {
                tracing::info!(%job_id, ?engine_id, %status, "Job finished");
            }
            DispatchEvent::RetriesExhausted { job_id, attempts } => {
                tracing::warn!(%job_id, attempts, "Job exhausted its assignment attempts");
            }
            DispatchEvent::StaleCompletion { job_id, status } => {
                tracing::warn!(%job_id, %status, "Ignoring report for job without an assignment");
            }
            DispatchEvent::JobCancelled { job_id, engine_id } => {
                tracing::info!(%job_id, ?engine_id, "Job cancelled");
            }
            DispatchEvent::AccountingViolation {
                engine_id,
                job_id,
                error,
            } => {
                tracing::error!(?engine_id, ?job_id, %error, "Load accounting violation");
            }
            DispatchEvent::CompletionLoopStarted => {
                tracing::info!("Completion consumer started");
            }
            DispatchEvent::CompletionLoopStopped { in_flight } => {
                tracing::info!(in_flight, "Completion consumer stopped");
            }
        }
    }
}

/// Assigns jobs to engines and keeps engine load counters in step with the
/// jobs that hold assignments.
#[derive(Clone)]
pub struct Dispatcher<R, J, X> {
    registry: R,
    jobs: J,
    executor: X,
    balancer: LoadBalancer<R>,
    config: DispatchConfig,
    reporter: Arc<dyn DispatchReporter>,
}

impl<R, J, X> Dispatcher<R, J, X>
where
    R: EngineRegistry,
    J: JobStore,
    X: EngineExecutor,
{
    pub fn new(registry: R, jobs: J, executor: X, config: DispatchConfig) -> Self {
        let balancer = LoadBalancer::new(registry.clone(), config.policy);
        Self {
            registry,
            jobs,
            executor,
            balancer,
            config,
            reporter: Arc::new(TracingDispatchReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn DispatchReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Create a job for `request.url` and make the initial dispatch decision.
    ///
    /// Returns once the job is handed to an engine or has failed
    /// (`no_capacity`, `retries_exhausted`, or a rejected hand-off). Never
    /// waits for the scrape itself.
    pub async fn track_product(
        &self,
        mut request: CreateScrapeJobRequest,
    ) -> Result<Assignment, AppError> {
        request.validate()?;
        if request.max_attempts.is_none() {
            request.max_attempts = Some(self.config.max_attempts);
        }
        let job = self.jobs.create_job(request).await?;
        self.reporter.report(DispatchEvent::JobSubmitted {
            job_id: job.id,
            url: &job.url,
        });
        self.dispatch(job).await
    }

    /// Dispatch an existing pending job.
    pub async fn submit(&self, job_id: Uuid) -> Result<Assignment, AppError> {
        let job = self.current(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(AppError::JobConflict(format!(
                "Job {job_id} is {}, only pending jobs can be submitted",
                job.status
            )));
        }
        self.dispatch(job).await
    }

    /// Apply a completion report from the executing engine.
    ///
    /// Reports for jobs that no longer hold an assignment (duplicates, late
    /// reports after cancellation) are ignored and return the job as it is.
    pub async fn report_completion(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
    ) -> Result<ScrapeJob, AppError> {
        let termination = match outcome {
            JobOutcome::Succeeded => JobTermination::succeeded(),
            JobOutcome::FailedLogic { message } => {
                JobTermination::failed(FailureReason::ScrapeFailed, message)
            }
            JobOutcome::FailedUnreachable { message } => {
                return self.redispatch_unreachable(job_id, &message).await;
            }
        };

        match self
            .jobs
            .finish_job(job_id, JobStatus::HOLDING_LOAD, None, termination)
            .await?
        {
            Some(job) => {
                self.release_assignment(&job).await?;
                self.reporter.report(DispatchEvent::JobFinished {
                    job_id: job.id,
                    engine_id: job.engine_id,
                    status: job.status,
                });
                Ok(job)
            }
            None => self.stale_report(job_id).await,
        }
    }

    /// Cancel a job.
    ///
    /// A pending job is cancelled outright. An assigned or running job is
    /// cancelled and its load is released, then its engine is asked to abort
    /// on a best-effort basis. Terminal jobs yield `JobConflict`.
    pub async fn cancel(&self, job_id: Uuid) -> Result<ScrapeJob, AppError> {
        for _ in 0..CANCEL_ROUNDS {
            if let Some(job) = self
                .jobs
                .finish_job(
                    job_id,
                    &[JobStatus::Pending],
                    None,
                    JobTermination::cancelled(),
                )
                .await?
            {
                self.reporter.report(DispatchEvent::JobCancelled {
                    job_id,
                    engine_id: None,
                });
                return Ok(job);
            }

            if let Some(job) = self
                .jobs
                .finish_job(
                    job_id,
                    JobStatus::HOLDING_LOAD,
                    None,
                    JobTermination::cancelled(),
                )
                .await?
            {
                let released = self.release_assignment(&job).await;
                if let Some(engine_id) = job.engine_id {
                    match self.registry.get(engine_id).await {
                        Ok(Some(engine)) => self.request_abort(&engine, job_id).await,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(%job_id, %engine_id, error = %e, "Engine lookup for abort failed");
                        }
                    }
                }
                self.reporter.report(DispatchEvent::JobCancelled {
                    job_id,
                    engine_id: job.engine_id,
                });
                released?;
                return Ok(job);
            }

            let job = self.current(job_id).await?;
            if job.status.is_terminal() {
                return Err(AppError::JobConflict(format!(
                    "Job {job_id} is already in terminal state: {}",
                    job.status
                )));
            }
        }

        Err(AppError::JobConflict(format!(
            "Job {job_id} kept changing state, cancellation not applied"
        )))
    }

    pub async fn set_engine_active(
        &self,
        engine_id: EngineId,
        active: bool,
    ) -> Result<ScraperEngine, AppError> {
        let engine = self.registry.set_active(engine_id, active).await?;
        tracing::info!(%engine_id, active, "Engine health flag updated");
        Ok(engine)
    }

    /// Consume completion reports until cancellation or until every sender
    /// is dropped. Reports are applied concurrently; in-flight ones are
    /// awaited before returning.
    pub async fn run_completions(
        &self,
        mut events: mpsc::Receiver<CompletionEvent>,
        cancel_token: CancellationToken,
    ) {
        let tracker = TaskTracker::new();
        self.reporter.report(DispatchEvent::CompletionLoopStarted);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                event = events.recv() => {
                    let Some(CompletionEvent { job_id, outcome }) = event else {
                        break;
                    };
                    let dispatcher = self.clone();
                    tracker.spawn(async move {
                        if let Err(e) = dispatcher.report_completion(job_id, outcome).await {
                            tracing::error!(%job_id, error = %e, "Failed to apply completion report");
                        }
                    });
                }
            }
        }

        tracker.close();
        self.reporter.report(DispatchEvent::CompletionLoopStopped {
            in_flight: tracker.len(),
        });
        tracker.wait().await;
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn dispatch(&self, mut job: ScrapeJob) -> Result<Assignment, AppError> {
        loop {
            if !job.can_attempt() {
                return self.exhaust(job).await;
            }

            let Some(engine) = self.reserve(job.id).await? else {
                return self.fail_no_capacity(job).await;
            };

            let Some(assigned) = self.jobs.assign_job(job.id, engine.id).await? else {
                // The job left Pending (cancelled) after the reservation.
                self.release_load(engine.id, Some(job.id)).await?;
                return self.unassigned(job.id).await;
            };
            job = assigned;
            let attempt = job.attempts;
            self.reporter.report(DispatchEvent::JobAssigned {
                job_id: job.id,
                engine: &engine,
                attempt,
            });

            // From here on every transition is pinned to `attempt`: a
            // concurrent report or cancel may already have moved the job on.
            let error = match self.executor.start(&engine, &job).await {
                Ok(()) => {
                    return match self.jobs.mark_running(job.id, Some(attempt)).await? {
                        Some(running) => Ok(Assignment {
                            job: running,
                            engine: Some(engine),
                        }),
                        None => self.settled(job.id, attempt, Some(engine)).await,
                    };
                }
                Err(e) => e,
            };

            let message = error.to_string();
            let will_retry = error.is_retryable();
            self.reporter.report(DispatchEvent::HandoffFailed {
                job_id: job.id,
                engine_id: engine.id,
                error: &message,
                will_retry,
            });

            if !will_retry {
                let termination = JobTermination::failed(FailureReason::ScrapeFailed, message);
                return match self
                    .jobs
                    .finish_job(job.id, JobStatus::HOLDING_LOAD, Some(attempt), termination)
                    .await?
                {
                    Some(failed) => {
                        self.release_assignment(&failed).await?;
                        self.reporter.report(DispatchEvent::JobFinished {
                            job_id: failed.id,
                            engine_id: failed.engine_id,
                            status: failed.status,
                        });
                        Ok(Assignment {
                            job: failed,
                            engine: None,
                        })
                    }
                    None => self.settled(job.id, attempt, None).await,
                };
            }

            match self
                .jobs
                .release_job(job.id, Some(attempt), &message)
                .await?
            {
                Some(released) => {
                    self.release_assignment(&released).await?;
                    job = released;
                }
                None => return self.settled(job.id, attempt, None).await,
            }
        }
    }

    /// Choose an engine and reserve one unit of its capacity.
    ///
    /// Every reservation is a compare-and-increment against the snapshot the
    /// balancer chose from. A lost compare means the engine's load or health
    /// changed underneath us, so selection runs again on a fresh snapshot.
    /// After `max_reserve_conflicts` consecutive losses the task yields
    /// before each further round to let the competing dispatches finish.
    async fn reserve(&self, job_id: Uuid) -> Result<Option<ScraperEngine>, AppError> {
        let mut conflicts = 0u32;
        loop {
            if conflicts >= self.config.max_reserve_conflicts {
                tokio::task::yield_now().await;
            }
            let Some(candidate) = self.balancer.select_engine().await? else {
                return Ok(None);
            };
            match self
                .registry
                .try_reserve(candidate.id, candidate.task_count)
                .await?
            {
                Reservation::Reserved(engine) => return Ok(Some(engine)),
                Reservation::Stale(current) => {
                    conflicts = conflicts.saturating_add(1);
                    self.reporter.report(DispatchEvent::ReserveConflict {
                        job_id,
                        engine_id: candidate.id,
                        observed: candidate.task_count,
                        current: current.task_count,
                        active: current.active,
                    });
                }
            }
        }
    }

    async fn redispatch_unreachable(
        &self,
        job_id: Uuid,
        message: &str,
    ) -> Result<ScrapeJob, AppError> {
        let Some(released) = self.jobs.release_job(job_id, None, message).await? else {
            return self.stale_report(job_id).await;
        };
        self.release_assignment(&released).await?;
        self.reporter.report(DispatchEvent::EngineReportedUnreachable {
            job_id,
            engine_id: released.engine_id,
            error: message,
        });
        Ok(self.dispatch(released).await?.job)
    }

    async fn fail_no_capacity(&self, job: ScrapeJob) -> Result<Assignment, AppError> {
        self.reporter
            .report(DispatchEvent::NoCapacity { job_id: job.id });
        let termination = JobTermination::failed(
            FailureReason::NoCapacity,
            "No active scraper engine available",
        );
        match self
            .jobs
            .finish_job(job.id, &[JobStatus::Pending], None, termination)
            .await?
        {
            Some(failed) => Ok(Assignment {
                job: failed,
                engine: None,
            }),
            None => self.unassigned(job.id).await,
        }
    }

    async fn exhaust(&self, job: ScrapeJob) -> Result<Assignment, AppError> {
        self.reporter.report(DispatchEvent::RetriesExhausted {
            job_id: job.id,
            attempts: job.attempts,
        });
        let message = match &job.error_message {
            Some(last) => format!("Exhausted {} assignment attempts: {last}", job.attempts),
            None => format!("Exhausted {} assignment attempts", job.attempts),
        };
        let termination = JobTermination::failed(FailureReason::RetriesExhausted, message);
        match self
            .jobs
            .finish_job(job.id, &[JobStatus::Pending], None, termination)
            .await?
        {
            Some(failed) => Ok(Assignment {
                job: failed,
                engine: None,
            }),
            None => self.unassigned(job.id).await,
        }
    }

    /// Release the load held by a job that just left `Assigned`/`Running`.
    async fn release_assignment(&self, job: &ScrapeJob) -> Result<(), AppError> {
        let Some(engine_id) = job.engine_id else {
            let error = AppError::JobConflict(format!(
                "Job {} left an assignment without an engine",
                job.id
            ));
            self.reporter.report(DispatchEvent::AccountingViolation {
                engine_id: None,
                job_id: Some(job.id),
                error: &error,
            });
            return Err(error);
        };
        self.release_load(engine_id, Some(job.id)).await?;
        Ok(())
    }

    async fn release_load(
        &self,
        engine_id: EngineId,
        job_id: Option<Uuid>,
    ) -> Result<ScraperEngine, AppError> {
        self.registry
            .decrement_load(engine_id)
            .await
            .inspect_err(|error| {
                if error.is_accounting_error() {
                    self.reporter.report(DispatchEvent::AccountingViolation {
                        engine_id: Some(engine_id),
                        job_id,
                        error,
                    });
                }
            })
    }

    async fn request_abort(&self, engine: &ScraperEngine, job_id: Uuid) {
        if let Err(e) = self.executor.abort(engine, job_id).await {
            tracing::warn!(%job_id, engine_id = %engine.id, error = %e, "Abort request failed");
        }
    }

    async fn stale_report(&self, job_id: Uuid) -> Result<ScrapeJob, AppError> {
        let job = self.current(job_id).await?;
        self.reporter.report(DispatchEvent::StaleCompletion {
            job_id,
            status: job.status,
        });
        Ok(job)
    }

    /// Result of a dispatch whose hand-off on `attempt` lost a transition to
    /// a concurrent cancel or completion report. `engine` is the engine that
    /// accepted the job on that attempt, if it did.
    async fn settled(
        &self,
        job_id: Uuid,
        attempt: u32,
        engine: Option<ScraperEngine>,
    ) -> Result<Assignment, AppError> {
        let job = self.current(job_id).await?;
        if job.status == JobStatus::Cancelled {
            // `cancel` aborted whatever engine it found on the record; ours
            // may have accepted the job after that.
            if job.attempts == attempt
                && let Some(engine) = &engine
            {
                self.request_abort(engine, job_id).await;
            }
            return Ok(Assignment { job, engine: None });
        }

        if job.attempts == attempt {
            return Ok(Assignment { job, engine });
        }

        // Reassigned by a report that arrived during the hand-off.
        let engine = match job.engine_id {
            Some(id) if job.status.holds_load() || job.status == JobStatus::Succeeded => {
                self.registry.get(id).await?
            }
            _ => None,
        };
        Ok(Assignment { job, engine })
    }

    async fn unassigned(&self, job_id: Uuid) -> Result<Assignment, AppError> {
        Ok(Assignment {
            job: self.current(job_id).await?,
            engine: None,
        })
    }

    async fn current(&self, job_id: Uuid) -> Result<ScrapeJob, AppError> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or(AppError::UnknownJob(job_id))
    }
}
