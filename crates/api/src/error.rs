//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::RepositoryError;
use event_store::EventStoreError;
use pipeline::{AuditError, ProcessingError};

/// API-level error type that maps to HTTP responses.
///
/// Transient storage failures answer `503` so callers (the payment provider
/// included) retry; everything else is final.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Event log error.
    EventStore(EventStoreError),
    /// Order repository error.
    Repository(RepositoryError),
    /// Audit log read error.
    Audit(AuditError),
    /// Pipeline bookkeeping error.
    Processing(ProcessingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::EventStore(err) => event_store_error_to_response(err),
            ApiError::Repository(err) => repository_error_to_response(err),
            ApiError::Audit(err) => match err {
                AuditError::Unavailable(_) | AuditError::Database(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
                }
                AuditError::InvalidRow(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            },
            ApiError::Processing(err) => match err {
                ProcessingError::EventStore(inner) => event_store_error_to_response(inner),
                other if other.is_transient() => {
                    (StatusCode::SERVICE_UNAVAILABLE, other.to_string())
                }
                other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
            },
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn event_store_error_to_response(err: EventStoreError) -> (StatusCode, String) {
    match &err {
        EventStoreError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        EventStoreError::InvalidStatus { .. } => (StatusCode::CONFLICT, err.to_string()),
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn repository_error_to_response(err: RepositoryError) -> (StatusCode, String) {
    match &err {
        RepositoryError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        RepositoryError::AlreadyExists(_) => (StatusCode::CONFLICT, err.to_string()),
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        ApiError::EventStore(err)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::Repository(err)
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        ApiError::Audit(err)
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        ApiError::Processing(err)
    }
}
