use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use argus_core::AgentError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Upstream deadline exceeded: {message}")]
    UpstreamTimeout { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: String, code: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message,
            code: code.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            AppError::Validation { ref message } => {
                warn!("Validation error: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new("validation_error", message.clone(), "VALIDATION_FAILED"),
                )
            }

            AppError::NotFound { ref resource } => {
                warn!("Resource not found: {}", resource);
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new(
                        "not_found",
                        format!("Resource not found: {}", resource),
                        "NOT_FOUND",
                    ),
                )
            }

            AppError::Upstream { ref message } => {
                error!("Upstream error: {}", message);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse::new("upstream_error", message.clone(), "UPSTREAM_ERROR"),
                )
            }

            AppError::UpstreamTimeout { ref message } => {
                error!("Upstream timeout: {}", message);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    ErrorResponse::new("upstream_timeout", message.clone(), "UPSTREAM_TIMEOUT"),
                )
            }

            AppError::Internal { ref message } => {
                error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "internal_error",
                        "An internal error occurred".to_string(),
                        "INTERNAL_ERROR",
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Transport(message) | AgentError::Parse(message) => {
                AppError::Upstream { message }
            }
            AgentError::DeadlineExceeded(message) => AppError::UpstreamTimeout { message },
            other => AppError::Internal { message: other.to_string() },
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

// 404 handler for unknown routes
pub async fn handle_404(uri: Uri) -> impl IntoResponse {
    let error_response = ErrorResponse::new(
        "not_found",
        format!("No route found for {}", uri.path()),
        "ROUTE_NOT_FOUND",
    );

    (StatusCode::NOT_FOUND, Json(error_response))
}

// Middleware for request tracing
use axum::{extract::Request, middleware::Next};

pub async fn trace_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let trace_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(
        trace_id = %trace_id,
        method = %method,
        uri = %uri,
        "Request started"
    );

    let response = next.run(request).await;

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}
