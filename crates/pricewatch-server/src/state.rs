use std::sync::Arc;

use pricewatch_core::dispatcher::CompletionEvent;
use pricewatch_db::Database;
use tokio::sync::mpsc;

use crate::service::ControlPlane;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub control: Arc<dyn ControlPlane>,
    /// Producer side of the completion channel drained by the dispatcher.
    pub completions: mpsc::Sender<CompletionEvent>,
    /// Present when running on PostgreSQL; `None` for in-memory storage.
    pub db: Option<Database>,
}
