//! One place to map [`DevtraceError`] to an HTTP response, `spec.md` §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::DevtraceError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for DevtraceError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            DevtraceError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            DevtraceError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            DevtraceError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            DevtraceError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
        };
        let body = ErrorBody {
            error: kind.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
