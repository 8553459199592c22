use std::net::IpAddr;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};

use pricewatch_core::engine::{EngineId, RegisterEngineRequest, Reservation, ScraperEngine};
use pricewatch_core::error::AppError;
use pricewatch_core::registry::EngineRegistry;

/// PostgreSQL-backed engine registry.
///
/// Every load change is a single-row `UPDATE … RETURNING`, so contention is
/// limited to the row of the engine being adjusted. The `task_count >= 0`
/// check constraint backs up the conditional decrement.
#[derive(Clone)]
pub struct PgEngineRegistry {
    pool: Pool<Postgres>,
}

impl PgEngineRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: EngineId) -> Result<Option<ScraperEngine>, AppError> {
        let row = sqlx::query_as::<_, EngineRow>(r#"SELECT * FROM scraper_engines WHERE id = $1"#)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(EngineRow::into_engine).transpose()
    }

    async fn list_where(&self, active_only: bool) -> Result<Vec<ScraperEngine>, AppError> {
        let rows = sqlx::query_as::<_, EngineRow>(
            r#"
            SELECT * FROM scraper_engines
            WHERE active OR NOT $1
            ORDER BY id
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(EngineRow::into_engine).collect()
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct EngineRow {
    id: i64,
    name: String,
    host: String,
    port: i32,
    active: bool,
    task_count: i32,
    updated_at: DateTime<Utc>,
}

impl EngineRow {
    fn into_engine(self) -> Result<ScraperEngine, AppError> {
        let host: IpAddr = self.host.parse().map_err(|_| {
            AppError::DatabaseError(format!(
                "Engine {} has an invalid host '{}'",
                self.id, self.host
            ))
        })?;
        let port = u16::try_from(self.port).map_err(|_| {
            AppError::DatabaseError(format!("Engine {} has an invalid port {}", self.id, self.port))
        })?;
        let task_count = u32::try_from(self.task_count).map_err(|_| {
            AppError::DatabaseError(format!(
                "Engine {} has a negative task count {}",
                self.id, self.task_count
            ))
        })?;

        Ok(ScraperEngine {
            id: EngineId(self.id),
            name: self.name,
            host,
            port,
            active: self.active,
            task_count,
            updated_at: self.updated_at,
        })
    }
}

impl EngineRegistry for PgEngineRegistry {
    async fn register(&self, request: RegisterEngineRequest) -> Result<ScraperEngine, AppError> {
        request.validate()?;
        let name = request.name.trim();

        let row = sqlx::query_as::<_, EngineRow>(
            r#"
            INSERT INTO scraper_engines (name, host, port, active)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(request.host.to_string())
        .bind(i32::from(request.port))
        .bind(request.active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::ValidationError(format!("Engine name '{name}' is already registered"))
            }
            e => AppError::DatabaseError(e.to_string()),
        })?;

        row.into_engine()
    }

    async fn get(&self, id: EngineId) -> Result<Option<ScraperEngine>, AppError> {
        self.fetch(id).await
    }

    async fn list(&self) -> Result<Vec<ScraperEngine>, AppError> {
        self.list_where(false).await
    }

    async fn list_active(&self) -> Result<Vec<ScraperEngine>, AppError> {
        self.list_where(true).await
    }

    async fn try_reserve(
        &self,
        id: EngineId,
        observed_load: u32,
    ) -> Result<Reservation, AppError> {
        let observed = i32::try_from(observed_load)
            .map_err(|_| AppError::Generic(format!("Observed load {observed_load} out of range")))?;

        let row = sqlx::query_as::<_, EngineRow>(
            r#"
            UPDATE scraper_engines
            SET task_count = task_count + 1, updated_at = NOW()
            WHERE id = $1 AND active AND task_count = $2
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(observed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => Ok(Reservation::Reserved(row.into_engine()?)),
            None => match self.fetch(id).await? {
                Some(current) => Ok(Reservation::Stale(current)),
                None => Err(AppError::UnknownEngine(id)),
            },
        }
    }

    async fn increment_load(&self, id: EngineId) -> Result<ScraperEngine, AppError> {
        let row = sqlx::query_as::<_, EngineRow>(
            r#"
            UPDATE scraper_engines
            SET task_count = task_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.ok_or(AppError::UnknownEngine(id))?.into_engine()
    }

    async fn decrement_load(&self, id: EngineId) -> Result<ScraperEngine, AppError> {
        let row = sqlx::query_as::<_, EngineRow>(
            r#"
            UPDATE scraper_engines
            SET task_count = task_count - 1, updated_at = NOW()
            WHERE id = $1 AND task_count > 0
            RETURNING *
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => row.into_engine(),
            None if self.fetch(id).await?.is_some() => Err(AppError::LoadUnderflow(id)),
            None => Err(AppError::UnknownEngine(id)),
        }
    }

    async fn set_active(&self, id: EngineId, active: bool) -> Result<ScraperEngine, AppError> {
        let row = sqlx::query_as::<_, EngineRow>(
            r#"
            UPDATE scraper_engines
            SET active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.0)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.ok_or(AppError::UnknownEngine(id))?.into_engine()
    }
}
