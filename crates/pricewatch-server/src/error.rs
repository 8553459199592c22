use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use pricewatch_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

fn classify(err: &AppError) -> (StatusCode, &'static str) {
    match err {
        AppError::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
        AppError::UnknownJob(_) | AppError::UnknownEngine(_) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        AppError::JobConflict(_) => (StatusCode::CONFLICT, "conflict"),
        AppError::EngineUnreachable(_) => (StatusCode::BAD_GATEWAY, "engine_unreachable"),
        AppError::ScrapeFailed(_) => (StatusCode::BAD_GATEWAY, "scrape_failed"),
        AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        AppError::LoadUnderflow(_) => (StatusCode::INTERNAL_SERVER_ERROR, "accounting_error"),
        AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
