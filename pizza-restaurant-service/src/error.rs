use axum::{http::StatusCode, response::Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("validation failed: {}", .0.join(" "))]
    ValidationFailed(Vec<String>),
    #[error("{0}")]
    Internal(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({
                    "error": message
                })),
            )
                .into_response(),
            ApiError::ValidationFailed(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "errors": errors
                })),
            )
                .into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": message
                })),
            )
                .into_response(),
        }
    }
}
