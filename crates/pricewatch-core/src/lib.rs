pub mod balancer;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod job;
pub mod job_store;
pub mod memory;
pub mod registry;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use balancer::{LoadBalancer, SelectionPolicy, TieBreak, select_engine};
pub use config::DispatchConfig;
pub use dispatcher::{
    Assignment, CompletionEvent, DispatchEvent, DispatchReporter, Dispatcher,
    TracingDispatchReporter,
};
pub use engine::{EngineId, RegisterEngineRequest, Reservation, ScraperEngine};
pub use error::AppError;
pub use executor::EngineExecutor;
pub use job::{
    CreateScrapeJobRequest, FailureReason, JobOutcome, JobStatus, JobTermination, ScrapeJob,
};
pub use job_store::JobStore;
pub use memory::{MemoryEngineRegistry, MemoryJobStore};
pub use registry::EngineRegistry;
