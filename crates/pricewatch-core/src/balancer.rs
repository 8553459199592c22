//! Least-loaded engine selection.
//!
//! Selection is a read-only decision over a point-in-time snapshot. The
//! snapshot may be stale by the time the caller acts on it, which is why the
//! dispatcher commits through a compare-and-increment on the chosen engine.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::engine::ScraperEngine;
use crate::error::AppError;
use crate::registry::EngineRegistry;

/// Order among engines that share the minimum load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Lowest engine id, i.e. earliest registration.
    #[default]
    LowestId,
    /// Engine name, ascending; id breaks remaining ties.
    Name,
}

impl fmt::Display for TieBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieBreak::LowestId => write!(f, "lowest_id"),
            TieBreak::Name => write!(f, "name"),
        }
    }
}

impl FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lowest_id" | "id" => Ok(TieBreak::LowestId),
            "name" => Ok(TieBreak::Name),
            _ => Err(format!(
                "Unknown tie-break policy '{s}' (expected 'lowest_id' or 'name')"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub tie_break: TieBreak,
}

impl SelectionPolicy {
    fn compare(&self, a: &ScraperEngine, b: &ScraperEngine) -> Ordering {
        a.task_count.cmp(&b.task_count).then_with(|| match self.tie_break {
            TieBreak::LowestId => a.id.cmp(&b.id),
            TieBreak::Name => a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)),
        })
    }
}

/// Pick the active engine with the lowest `task_count`.
///
/// Returns `None` when no engine in the snapshot is active. The result does
/// not depend on the order of `engines`.
pub fn select_engine<'a>(
    engines: &'a [ScraperEngine],
    policy: &SelectionPolicy,
) -> Option<&'a ScraperEngine> {
    engines
        .iter()
        .filter(|engine| engine.active)
        .min_by(|a, b| policy.compare(a, b))
}

/// Selection over the live registry.
#[derive(Debug, Clone)]
pub struct LoadBalancer<R> {
    registry: R,
    policy: SelectionPolicy,
}

impl<R: EngineRegistry> LoadBalancer<R> {
    pub fn new(registry: R, policy: SelectionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Snapshot the active engines and pick one. `Ok(None)` means no engine
    /// is available, which callers must treat as a normal outcome.
    pub async fn select_engine(&self) -> Result<Option<ScraperEngine>, AppError> {
        let snapshot = self.registry.list_active().await?;
        Ok(select_engine(&snapshot, &self.policy).cloned())
    }
}
