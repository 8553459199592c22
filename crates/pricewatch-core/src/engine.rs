use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Maximum length of an engine name.
pub const MAX_ENGINE_NAME_LEN: usize = 100;

/// Identity of a registered scraper engine.
///
/// Ids are handed out in registration order, so ordering by id is ordering
/// by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub i64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EngineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>()
            .map(EngineId)
            .map_err(|_| format!("Invalid engine id: {s}"))
    }
}

/// A registered scraper worker and its current load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScraperEngine {
    pub id: EngineId,
    pub name: String,
    pub host: IpAddr,
    pub port: u16,
    pub active: bool,
    /// Jobs currently assigned to this engine and not yet finished.
    pub task_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ScraperEngine {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Base URL of the engine's HTTP API, e.g. `http://127.0.0.1:8000`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }
}

/// Request to register a new engine.
#[derive(Debug, Clone)]
pub struct RegisterEngineRequest {
    pub name: String,
    pub host: IpAddr,
    pub port: u16,
    pub active: bool,
}

impl RegisterEngineRequest {
    /// New engines start inactive until a health check (or the operator)
    /// marks them active.
    pub fn new(name: impl Into<String>, host: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            host,
            port,
            active: false,
        }
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::ValidationError(
                "Engine name must not be empty".into(),
            ));
        }
        if name.chars().count() > MAX_ENGINE_NAME_LEN {
            return Err(AppError::ValidationError(format!(
                "Engine name must be at most {MAX_ENGINE_NAME_LEN} characters"
            )));
        }
        if self.port == 0 {
            return Err(AppError::ValidationError(
                "Engine port must be between 1 and 65535".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a compare-and-increment on an engine's load counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The counter was incremented; carries the updated engine.
    Reserved(ScraperEngine),
    /// The engine changed since the snapshot (load moved or it went
    /// inactive). Nothing was written; carries the current record.
    Stale(ScraperEngine),
}
