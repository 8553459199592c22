use pricewatch_core::engine::EngineId;
use pricewatch_core::error::AppError;
use pricewatch_core::job::{
    CreateScrapeJobRequest, FailureReason, JobStatus, JobTermination,
};
use pricewatch_core::job_store::JobStore;
use pricewatch_core::registry::EngineRegistry;
use pricewatch_db::{PgEngineRegistry, PgJobStore};
use uuid::Uuid;

use crate::integration::common::{engine_request, setup_test_db};

fn test_request() -> CreateScrapeJobRequest {
    CreateScrapeJobRequest::new("https://shop.example/p/1").with_email("owner@example.com")
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn create_job_and_verify_fields() {
    let (pool, _container) = setup_test_db().await;
    let jobs = PgJobStore::new(pool);

    let job = jobs.create_job(test_request()).await.unwrap();

    assert_eq!(job.url, "https://shop.example/p/1");
    assert_eq!(job.email.as_deref(), Some("owner@example.com"));
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert!(job.engine_id.is_none());
    assert!(job.assigned_at.is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn assignment_lifecycle() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool.clone());
    let jobs = PgJobStore::new(pool);
    let engine = registry.register(engine_request(1)).await.unwrap();

    let job = jobs.create_job(test_request()).await.unwrap();

    let assigned = jobs.assign_job(job.id, engine.id).await.unwrap().unwrap();
    assert_eq!(assigned.status, JobStatus::Assigned);
    assert_eq!(assigned.engine_id, Some(engine.id));
    assert_eq!(assigned.attempts, 1);
    assert!(assigned.assigned_at.is_some());

    // Already assigned: the transition does not apply twice.
    assert!(jobs.assign_job(job.id, engine.id).await.unwrap().is_none());

    let running = jobs.mark_running(job.id, None).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);

    let released = jobs
        .release_job(job.id, Some(1), "connection reset")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, JobStatus::Pending);
    assert_eq!(released.engine_id, Some(engine.id));
    assert_eq!(released.error_message.as_deref(), Some("connection reset"));

    jobs.assign_job(job.id, engine.id).await.unwrap().unwrap();
    let done = jobs
        .finish_job(job.id, JobStatus::HOLDING_LOAD, Some(2), JobTermination::succeeded())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.attempts, 2);
    assert!(done.completed_at.is_some());

    // Terminal jobs do not move again.
    assert!(
        jobs.finish_job(job.id, JobStatus::HOLDING_LOAD, None, JobTermination::cancelled())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn finish_keeps_last_error_when_termination_has_none() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool.clone());
    let jobs = PgJobStore::new(pool);
    let engine = registry.register(engine_request(1)).await.unwrap();

    let job = jobs.create_job(test_request()).await.unwrap();
    jobs.assign_job(job.id, engine.id).await.unwrap();
    jobs.release_job(job.id, None, "timeout").await.unwrap();

    let failed = jobs
        .finish_job(
            job.id,
            &[JobStatus::Pending],
            None,
            JobTermination::failed(FailureReason::NoCapacity, "no engine"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.failure_reason, Some(FailureReason::NoCapacity));
    assert_eq!(failed.error_message.as_deref(), Some("no engine"));

    let other = jobs.create_job(test_request()).await.unwrap();
    jobs.assign_job(other.id, engine.id).await.unwrap();
    jobs.release_job(other.id, None, "timeout").await.unwrap();
    let cancelled = jobs
        .finish_job(other.id, &[JobStatus::Pending], None, JobTermination::cancelled())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.error_message.as_deref(), Some("timeout"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn attempt_guard_rejects_superseded_assignment() {
    let (pool, _container) = setup_test_db().await;
    let registry = PgEngineRegistry::new(pool.clone());
    let jobs = PgJobStore::new(pool);
    let first = registry.register(engine_request(1)).await.unwrap();
    let second = registry.register(engine_request(2)).await.unwrap();

    let job = jobs.create_job(test_request()).await.unwrap();
    jobs.assign_job(job.id, first.id).await.unwrap().unwrap();
    jobs.release_job(job.id, None, "unreachable").await.unwrap().unwrap();
    jobs.assign_job(job.id, second.id).await.unwrap().unwrap();

    assert!(jobs.mark_running(job.id, Some(1)).await.unwrap().is_none());
    assert!(
        jobs.release_job(job.id, Some(1), "late timeout")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        jobs.finish_job(
            job.id,
            JobStatus::HOLDING_LOAD,
            Some(1),
            JobTermination::failed(FailureReason::ScrapeFailed, "late"),
        )
        .await
        .unwrap()
        .is_none()
    );

    let running = jobs.mark_running(job.id, Some(2)).await.unwrap().unwrap();
    assert_eq!(running.engine_id, Some(second.id));
    assert_eq!(running.attempts, 2);
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn transitions_on_unknown_job_fail() {
    let (pool, _container) = setup_test_db().await;
    let jobs = PgJobStore::new(pool);
    let id = Uuid::new_v4();

    assert!(matches!(
        jobs.mark_running(id, None).await,
        Err(AppError::UnknownJob(_))
    ));
    assert!(matches!(
        jobs.assign_job(id, EngineId(1)).await,
        Err(AppError::UnknownJob(_))
    ));
    assert!(jobs.get_job(id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn list_and_count_by_status() {
    let (pool, _container) = setup_test_db().await;
    let jobs = PgJobStore::new(pool);

    let first = jobs.create_job(test_request()).await.unwrap();
    let second = jobs.create_job(test_request()).await.unwrap();
    jobs.finish_job(second.id, &[JobStatus::Pending], None, JobTermination::cancelled())
        .await
        .unwrap();

    let all = jobs.list_jobs(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let pending = jobs.list_jobs(Some(JobStatus::Pending), 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first.id);

    assert_eq!(jobs.count_by_status(JobStatus::Pending).await.unwrap(), 1);
    assert_eq!(jobs.count_by_status(JobStatus::Cancelled).await.unwrap(), 1);
    assert_eq!(jobs.list_jobs(None, 1).await.unwrap().len(), 1);
}
