use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use pricewatch_core::config::DEFAULT_MAX_ATTEMPTS;
use pricewatch_core::engine::EngineId;
use pricewatch_core::error::AppError;
use pricewatch_core::job::{CreateScrapeJobRequest, JobStatus, JobTermination, ScrapeJob};
use pricewatch_core::job_store::JobStore;

/// PostgreSQL-backed job store.
///
/// Each state change is one `UPDATE … WHERE status = ANY(...)`, so two callers
/// racing on the same job can never both win a transition. An attempt guard
/// becomes `($n::INT IS NULL OR attempts = $n)` in the same statement.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Turn a transition that matched no row into `None`, or `UnknownJob` if
    /// the job does not exist at all.
    async fn settle(
        &self,
        job_id: Uuid,
        row: Option<ScrapeJobRow>,
    ) -> Result<Option<ScrapeJob>, AppError> {
        if let Some(row) = row {
            return Ok(Some(row.into()));
        }
        let (exists,): (bool,) =
            sqlx::query_as(r#"SELECT EXISTS(SELECT 1 FROM scrape_jobs WHERE id = $1)"#)
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if exists {
            Ok(None)
        } else {
            Err(AppError::UnknownJob(job_id))
        }
    }
}

fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ScrapeJobRow {
    id: Uuid,
    url: String,
    email: Option<String>,
    status: String,
    engine_id: Option<i64>,
    attempts: i32,
    max_attempts: i32,
    failure_reason: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    assigned_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<ScrapeJobRow> for ScrapeJob {
    fn from(row: ScrapeJobRow) -> Self {
        ScrapeJob {
            id: row.id,
            url: row.url,
            email: row.email,
            status: row.status.parse().unwrap_or(JobStatus::Pending),
            engine_id: row.engine_id.map(EngineId),
            attempts: row.attempts as u32,
            max_attempts: row.max_attempts as u32,
            failure_reason: row.failure_reason.and_then(|r| r.parse().ok()),
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            assigned_at: row.assigned_at,
            completed_at: row.completed_at,
        }
    }
}

impl JobStore for PgJobStore {
    async fn create_job(&self, request: CreateScrapeJobRequest) -> Result<ScrapeJob, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            INSERT INTO scrape_jobs (url, email, max_attempts)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.url)
        .bind(&request.email)
        .bind(request.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS) as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(r#"SELECT * FROM scrape_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeJob>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, ScrapeJobRow>(
                r#"
                SELECT * FROM scrape_jobs
                WHERE status = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ScrapeJobRow>(
                r#"
                SELECT * FROM scrape_jobs
                ORDER BY created_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM scrape_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    async fn assign_job(
        &self,
        job_id: Uuid,
        engine_id: EngineId,
    ) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            UPDATE scrape_jobs
            SET status = 'assigned', engine_id = $2, attempts = attempts + 1,
                assigned_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(engine_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.settle(job_id, row).await
    }

    async fn mark_running(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
    ) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            UPDATE scrape_jobs
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status = 'assigned'
              AND ($2::INT IS NULL OR attempts = $2)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(attempt.map(|n| n as i32))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.settle(job_id, row).await
    }

    async fn release_job(
        &self,
        job_id: Uuid,
        attempt: Option<u32>,
        error: &str,
    ) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            UPDATE scrape_jobs
            SET status = 'pending', error_message = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
              AND ($4::INT IS NULL OR attempts = $4)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(status_names(JobStatus::HOLDING_LOAD))
        .bind(error)
        .bind(attempt.map(|n| n as i32))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.settle(job_id, row).await
    }

    async fn finish_job(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        attempt: Option<u32>,
        termination: JobTermination,
    ) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            UPDATE scrape_jobs
            SET status = $3, failure_reason = $4,
                error_message = COALESCE($5, error_message),
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
              AND ($6::INT IS NULL OR attempts = $6)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(status_names(from))
        .bind(termination.status.as_str())
        .bind(termination.failure_reason.map(|r| r.as_str()))
        .bind(termination.error_message)
        .bind(attempt.map(|n| n as i32))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        self.settle(job_id, row).await
    }
}
