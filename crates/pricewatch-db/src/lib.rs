pub mod config;
pub mod database;
pub mod engine_repository;
pub mod job_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use engine_repository::PgEngineRegistry;
pub use job_repository::PgJobStore;
