use std::net::IpAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use pricewatch_core::dispatcher::{Assignment, CompletionEvent};
use pricewatch_core::engine::{EngineId, RegisterEngineRequest};
use pricewatch_core::error::AppError;
use pricewatch_core::job::{CreateScrapeJobRequest, FailureReason, JobStatus};

use crate::dto::{
    CompletionAccepted, CompletionRequest, EngineListResponse, EngineResponse, HealthResponse,
    JobListResponse, JobResponse, ListJobsQuery, RegisterEngineBody, SetActiveRequest,
    TrackProductRequest, TrackResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/products", post(track_product))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/v1/jobs/{id}/completion", post(report_completion))
        .route("/v1/engines", get(list_engines).post(register_engine))
        .route("/v1/engines/{id}/active", put(set_engine_active));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// HTTP status for the initial dispatch decision. The body is the same
/// [`TrackResponse`] in every case.
fn track_status(assignment: &Assignment) -> StatusCode {
    if assignment.is_assigned() {
        return StatusCode::CREATED;
    }
    match assignment.job.failure_reason {
        Some(FailureReason::NoCapacity) => StatusCode::SERVICE_UNAVAILABLE,
        Some(FailureReason::RetriesExhausted | FailureReason::ScrapeFailed) => {
            StatusCode::BAD_GATEWAY
        }
        None if assignment.job.status == JobStatus::Cancelled => StatusCode::CONFLICT,
        // Moved on by a concurrent completion report; dispatch continues there.
        None => StatusCode::ACCEPTED,
    }
}

fn validate_product_url(raw: &str) -> Result<(), AppError> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::ValidationError(format!("Invalid product URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AppError::ValidationError(format!(
            "URL scheme '{scheme}' is not allowed (only http/https)"
        ))),
    }
}

#[utoipa::path(
    post,
    path = "/v1/products",
    request_body = TrackProductRequest,
    responses(
        (status = 201, description = "Job handed to an engine", body = TrackResponse),
        (status = 202, description = "Job reassigned while being dispatched", body = TrackResponse),
        (status = 400, description = "Bad request", body = crate::dto::ErrorResponse),
        (status = 409, description = "Job cancelled while being dispatched", body = TrackResponse),
        (status = 502, description = "Hand-off failed or retries exhausted", body = TrackResponse),
        (status = 503, description = "No active engine available", body = TrackResponse),
    ),
    tag = "products"
)]
pub async fn track_product(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<TrackProductRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_product_url(&body.url)?;

    let mut request = CreateScrapeJobRequest::new(body.url);
    if let Some(email) = body.email {
        request = request.with_email(email);
    }
    if let Some(max) = body.max_attempts {
        request = request.with_max_attempts(max);
    }

    let assignment = state.control.track_product(request).await?;
    let status = track_status(&assignment);

    Ok((status, axum::Json(TrackResponse::from(assignment))))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "List of jobs", body = JobListResponse),
        (status = 400, description = "Unknown status filter", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status_filter = query
        .status
        .map(|s| s.parse::<JobStatus>().map_err(AppError::ValidationError))
        .transpose()?;

    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.control.list_jobs(status_filter, limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .control
        .get_job(id)
        .await?
        .ok_or(AppError::UnknownJob(id))?;

    Ok(axum::Json(JobResponse::from(job)))
}

#[utoipa::path(
    delete,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job cancelled", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Job already finished", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.control.cancel_job(id).await?;
    Ok(axum::Json(JobResponse::from(job)))
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{id}/completion",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    request_body = CompletionRequest,
    responses(
        (status = 202, description = "Report queued", body = CompletionAccepted),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn report_completion(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<CompletionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.control.get_job(id).await?.is_none() {
        return Err(AppError::UnknownJob(id).into());
    }

    let event = CompletionEvent {
        job_id: id,
        outcome: body.into(),
    };
    state
        .completions
        .send(event)
        .await
        .map_err(|_| AppError::Generic("Completion queue is closed".into()))?;

    let response = CompletionAccepted {
        job_id: id,
        queued: true,
    };
    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/engines",
    responses(
        (status = 200, description = "Registered engines in id order", body = EngineListResponse),
    ),
    tag = "engines"
)]
pub async fn list_engines(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let engines = state.control.list_engines().await?;
    let total = engines.len();

    let response = EngineListResponse {
        engines: engines.into_iter().map(EngineResponse::from).collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/engines",
    request_body = RegisterEngineBody,
    responses(
        (status = 201, description = "Engine registered", body = EngineResponse),
        (status = 400, description = "Invalid or duplicate engine", body = crate::dto::ErrorResponse),
    ),
    tag = "engines"
)]
pub async fn register_engine(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RegisterEngineBody>,
) -> Result<impl IntoResponse, ApiError> {
    let host: IpAddr = body.host.trim().parse().map_err(|_| {
        AppError::ValidationError(format!("Engine host '{}' is not an IP address", body.host))
    })?;

    let request =
        RegisterEngineRequest::new(body.name, host, body.port).active(body.active.unwrap_or(false));
    let engine = state.control.register_engine(request).await?;

    Ok((StatusCode::CREATED, axum::Json(EngineResponse::from(engine))))
}

#[utoipa::path(
    put,
    path = "/v1/engines/{id}/active",
    params(
        ("id" = i64, Path, description = "Engine ID")
    ),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Health flag updated", body = EngineResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "engines"
)]
pub async fn set_engine_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    axum::Json(body): axum::Json<SetActiveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state
        .control
        .set_engine_active(EngineId(id), body.active)
        .await?;

    Ok(axum::Json(EngineResponse::from(engine)))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (storage, db_status) = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => ("postgres", "ok"),
            Err(_) => ("postgres", "error"),
        },
        None => ("memory", "disabled"),
    };

    let healthy = db_status != "error" && !state.completions.is_closed();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        storage,
        database: db_status,
    };

    (status, axum::Json(response))
}
