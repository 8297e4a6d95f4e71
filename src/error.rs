//! Common error types for the gateway orchestrator

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gateway id already registered: {0}")]
    DuplicateId(String),

    #[error("No eligible gateway available: {0}")]
    NotAvailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration rejected: {0}")]
    Rejected(String),

    #[error("Distribution {0} finished with failed targets")]
    PartialFailure(String),

    #[error("Orchestration is disabled")]
    Disabled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a failed configuration push may be attempted again.
    ///
    /// Rejections are final: the gateway refused the payload itself, so
    /// sending it again cannot succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Rejected(_) | AppError::NotFound(_) | AppError::InvalidRequest(_)
        )
    }
}

/// Error response format
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code) = match &self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", Some("invalid_json")),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, "gateway_error", None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error", Some("not_found")),
            AppError::DuplicateId(_) => (StatusCode::CONFLICT, "conflict_error", Some("duplicate_id")),
            AppError::NotAvailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("no_gateway_available")),
            AppError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout_error", None),
            AppError::Rejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request_error", Some("config_rejected")),
            AppError::PartialFailure(_) => (StatusCode::BAD_GATEWAY, "gateway_error", Some("partial_failure")),
            AppError::Disabled => (StatusCode::SERVICE_UNAVAILABLE, "server_error", Some("orchestration_disabled")),
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error", None),
            AppError::Transport(_) => (StatusCode::BAD_GATEWAY, "gateway_error", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", None),
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: error_type.to_string(),
                code: code.map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
