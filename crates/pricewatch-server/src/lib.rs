//! REST control plane: routes, DTOs, OpenAPI documentation, and the
//! object-safe facade over the dispatcher.

pub mod config;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod service;
pub mod state;
