//! API error type mapping engine errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Engine(EngineError::UnknownGraph(_)) => (StatusCode::NOT_FOUND, "GRAPH_NOT_FOUND"),
            ApiError::Engine(EngineError::UnknownRun(_)) => (StatusCode::NOT_FOUND, "RUN_NOT_FOUND"),
            ApiError::Engine(EngineError::Graph(_)) => (StatusCode::BAD_REQUEST, "INVALID_GRAPH"),
            ApiError::Engine(EngineError::Archive { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RUN_ARCHIVE_UNAVAILABLE")
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        };

        let body = Json(json!({ "error": { "code": code, "message": self.to_string() } }));
        (status, body).into_response()
    }
}
