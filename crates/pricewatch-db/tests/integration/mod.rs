pub mod common;

mod dispatch_tests;
mod engine_registry_tests;
mod job_store_tests;
