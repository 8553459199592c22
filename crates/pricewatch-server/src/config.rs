use std::time::Duration;

use pricewatch_core::AppError;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_COMPLETION_BUFFER: usize = 256;

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Externally reachable base URL, sent to engines as the completion
    /// callback prefix.
    pub public_url: Option<String>,
    pub engine_timeout: Duration,
    /// Capacity of the completion-report channel.
    pub completion_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            public_url: None,
            engine_timeout: Duration::from_secs(DEFAULT_ENGINE_TIMEOUT_SECS),
            completion_buffer: DEFAULT_COMPLETION_BUFFER,
        }
    }
}

impl ServerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PRICEWATCH_PORT` (optional, defaults to 3000)
    /// - `PRICEWATCH_PUBLIC_URL` (optional)
    /// - `PRICEWATCH_ENGINE_TIMEOUT_SECS` (optional, defaults to 10)
    /// - `PRICEWATCH_COMPLETION_BUFFER` (optional, defaults to 256)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let port = match lookup("PRICEWATCH_PORT") {
            None => DEFAULT_PORT,
            Some(raw) => raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!("Invalid PRICEWATCH_PORT '{raw}'"))
            })?,
        };

        let engine_timeout_secs: u64 = parse_positive(
            "PRICEWATCH_ENGINE_TIMEOUT_SECS",
            lookup("PRICEWATCH_ENGINE_TIMEOUT_SECS"),
            DEFAULT_ENGINE_TIMEOUT_SECS,
        )?;
        let completion_buffer = parse_positive(
            "PRICEWATCH_COMPLETION_BUFFER",
            lookup("PRICEWATCH_COMPLETION_BUFFER"),
            DEFAULT_COMPLETION_BUFFER as u64,
        )? as usize;

        let public_url = lookup("PRICEWATCH_PUBLIC_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            port,
            public_url,
            engine_timeout: Duration::from_secs(engine_timeout_secs),
            completion_buffer,
        })
    }
}

fn parse_positive(name: &str, raw: Option<String>, default: u64) -> Result<u64, AppError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::ConfigError(format!("{name} must be at least 1"))),
        Ok(value) => Ok(value),
        Err(_) => Err(AppError::ConfigError(format!(
            "Invalid {name} '{raw}': must be a positive integer"
        ))),
    }
}
