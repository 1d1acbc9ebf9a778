//! Server-wide error taxonomy (§7). Typed `thiserror` leaf errors at
//! module boundaries; `anyhow` above that for orchestration code that
//! only needs `?` to propagate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for HeimdallError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            HeimdallError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            HeimdallError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            HeimdallError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            HeimdallError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            HeimdallError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            HeimdallError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            HeimdallError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if matches!(
            self,
            HeimdallError::Storage(_) | HeimdallError::Internal(_)
        ) {
            tracing::error!(err = %self, "request failed");
        }
        let body = Json(json!({ "code": code, "message": self.to_string() }));
        (status, body).into_response()
    }
}

pub type HeimdallResult<T> = Result<T, HeimdallError>;
