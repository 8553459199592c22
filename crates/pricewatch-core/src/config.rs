use crate::balancer::{SelectionPolicy, TieBreak};
use crate::error::AppError;

/// Assignment attempts per job unless the request says otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Consecutive lost compare-and-increment races before the dispatcher starts
/// yielding between reservation rounds.
pub const DEFAULT_MAX_RESERVE_CONFLICTS: u32 = 16;

/// Dispatch policy.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub max_reserve_conflicts: u32,
    pub policy: SelectionPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_reserve_conflicts: DEFAULT_MAX_RESERVE_CONFLICTS,
            policy: SelectionPolicy::default(),
        }
    }
}

impl DispatchConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PRICEWATCH_MAX_ATTEMPTS` (optional, defaults to 3)
    /// - `PRICEWATCH_MAX_RESERVE_CONFLICTS` (optional, defaults to 16)
    /// - `PRICEWATCH_TIE_BREAK` (optional, `lowest_id` or `name`)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let max_attempts = parse_positive(
            "PRICEWATCH_MAX_ATTEMPTS",
            lookup("PRICEWATCH_MAX_ATTEMPTS"),
            DEFAULT_MAX_ATTEMPTS,
        )?;
        let max_reserve_conflicts = parse_positive(
            "PRICEWATCH_MAX_RESERVE_CONFLICTS",
            lookup("PRICEWATCH_MAX_RESERVE_CONFLICTS"),
            DEFAULT_MAX_RESERVE_CONFLICTS,
        )?;
        let tie_break = match lookup("PRICEWATCH_TIE_BREAK") {
            None => TieBreak::default(),
            Some(raw) => raw.parse().map_err(AppError::ConfigError)?,
        };

        Ok(Self {
            max_attempts,
            max_reserve_conflicts,
            policy: SelectionPolicy { tie_break },
        })
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.policy.tie_break = tie_break;
        self
    }
}

fn parse_positive(name: &str, raw: Option<String>, default: u32) -> Result<u32, AppError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let parsed: u32 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {name} '{raw}': must be a positive integer"
        ))
    })?;
    if parsed == 0 {
        return Err(AppError::ConfigError(format!("{name} must be at least 1")));
    }
    Ok(parsed)
}
