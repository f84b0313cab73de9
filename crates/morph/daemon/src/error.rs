//! Error types for morphd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use morph_registry::RegistryError;
use morph_router::RouterError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// A config source could not be set up
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// The registry has not published its first snapshot yet
    #[error("Not ready for transform requests")]
    NotReady,

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// The router refused the request before any step ran
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Router(e) => match e {
                RouterError::Resolution(_) | RouterError::UnknownTransformer(_) => {
                    (StatusCode::BAD_REQUEST, "NO_CAPABLE_WORKER")
                }
                RouterError::Envelope(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                RouterError::Protocol(_) | RouterError::PlanTooDeep(..) => {
                    (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR")
                }
                RouterError::Duplicate(_) => (StatusCode::CONFLICT, "DUPLICATE_REQUEST"),
                RouterError::Dispatch { .. } | RouterError::Queue(_) | RouterError::Cancelled(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "TRANSIENT_ERROR")
                }
            },
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Router(RouterError::Resolution(RegistryError::NoCapableWorker {
                source_media_type,
                target_media_type,
                source_size,
            })) => Some(serde_json::json!({
                "sourceMediaType": source_media_type,
                "targetMediaType": target_media_type,
                "sourceSize": source_size,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: self.details(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
