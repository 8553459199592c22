use std::time::Duration;

use pricewatch_core::engine::ScraperEngine;
use pricewatch_core::error::AppError;
use pricewatch_core::executor::EngineExecutor;
use pricewatch_core::job::ScrapeJob;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hands scrape jobs to engines over HTTP.
///
/// `POST {engine}/v1/scrape` starts a job and `DELETE {engine}/v1/scrape/{id}`
/// aborts one. When a public base URL is configured, each hand-off carries
/// the callback URL the engine should post its completion report to.
#[derive(Clone)]
pub struct HttpEngineClient {
    client: Client,
    timeout_secs: u64,
    callback_base: Option<Url>,
}

impl HttpEngineClient {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(DEFAULT_ENGINE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            callback_base: None,
        })
    }

    /// Base URL under which this service receives completion reports,
    /// e.g. `http://dispatcher.internal:3000` or `https://gateway/pricewatch`.
    /// A path prefix is kept.
    pub fn with_callback_base(mut self, base: &str) -> Result<Self, AppError> {
        let mut parsed = Url::parse(base)
            .map_err(|e| AppError::ConfigError(format!("Invalid callback base URL: {e}")))?;
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }
        self.callback_base = Some(parsed);
        Ok(self)
    }

    fn callback_url(&self, job_id: Uuid) -> Result<Option<String>, AppError> {
        let Some(base) = &self.callback_base else {
            return Ok(None);
        };
        base.join(&format!("v1/jobs/{job_id}/completion"))
            .map(|url| Some(url.to_string()))
            .map_err(|e| AppError::HttpError(format!("Invalid callback URL: {e}")))
    }

    fn map_send_error(&self, engine: &ScraperEngine, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::EngineUnreachable(format!("Connection to {} failed: {e}", engine.address()))
        } else {
            AppError::EngineUnreachable(format!("Request to {} failed: {e}", engine.address()))
        }
    }
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    job_id: Uuid,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<String>,
}

/// Map a non-success hand-off status to the dispatch error taxonomy.
///
/// Server-side failures mean the engine cannot take work right now, so the
/// job may go elsewhere. Anything else is the engine refusing this job.
fn classify_status(engine: &ScraperEngine, status: StatusCode) -> AppError {
    if status.is_server_error() {
        AppError::EngineUnreachable(format!(
            "Engine {} answered HTTP {}",
            engine.name,
            status.as_u16()
        ))
    } else {
        AppError::ScrapeFailed(format!(
            "Engine {} rejected job: HTTP {}",
            engine.name,
            status.as_u16()
        ))
    }
}

impl EngineExecutor for HttpEngineClient {
    async fn start(&self, engine: &ScraperEngine, job: &ScrapeJob) -> Result<(), AppError> {
        let endpoint = format!("{}/v1/scrape", engine.base_url());
        let body = ScrapeRequest {
            job_id: job.id,
            url: &job.url,
            callback_url: self.callback_url(job.id)?,
        };

        tracing::debug!(job_id = %job.id, %endpoint, "Handing job to engine");

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(engine, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(engine, status));
        }
        Ok(())
    }

    async fn abort(&self, engine: &ScraperEngine, job_id: Uuid) -> Result<(), AppError> {
        let endpoint = format!("{}/v1/scrape/{job_id}", engine.base_url());

        let response = self
            .client
            .delete(&endpoint)
            .send()
            .await
            .map_err(|e| self.map_send_error(engine, e))?;

        let status = response.status();
        // The engine may already have finished and forgotten the job.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(classify_status(engine, status))
    }
}
