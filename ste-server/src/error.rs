//! Error types of the control-plane API layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ste_engine::EngineError;
use ste_engine::plan::PlanError;
use thiserror::Error;

/// Error type for control-plane requests.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Errors from the engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Malformed request payloads or parameters.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Result type for control-plane handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Engine(EngineError::UnknownJob(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(
                EngineError::DuplicatePart(_, _)
                | EngineError::InvalidOrder(_)
                | EngineError::Plan(PlanError::Unrepresentable(_)),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => {
                // Anything else is an engine fault and worth a loud log.
                tracing::error!(
                    error = err as &dyn std::error::Error,
                    "engine error handling request"
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::BadRequest(msg) => {
                tracing::debug!("bad request: {}", msg);
                StatusCode::BAD_REQUEST
            }
        };

        (status, self.to_string()).into_response()
    }
}
