use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use lib_common::StoreError;

/// Errors surfaced by the HTTP handlers, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum AppError {
    /// The query matched nothing.
    NotFound(String),
    /// A query parameter is out of range.
    Invalid(String),
    /// The alert store failed.
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            AppError::Invalid(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            AppError::Store(e) => {
                tracing::error!(error = %e, "alert store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error al consultar las alertas.".to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
