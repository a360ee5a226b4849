//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use warden_types::error::{OrchestratorError, SupervisorError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Orchestrator operation failed.
    Orchestrator(OrchestratorError),
    /// Supervisor adapter rejected a decision.
    Supervisor(SupervisorError),
    /// Ill-formed request payload.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Orchestrator(e)
    }
}

impl From<SupervisorError> for AppError {
    fn from(e: SupervisorError) -> Self {
        AppError::Supervisor(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Orchestrator(e) => match e {
                OrchestratorError::WorkflowNotFound(_)
                | OrchestratorError::SnapshotNotFound(_)
                | OrchestratorError::RequestNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
                }
                OrchestratorError::DuplicateWorkflow(_) => {
                    (StatusCode::CONFLICT, "DUPLICATE_WORKFLOW", e.to_string())
                }
                OrchestratorError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "INVALID_TRANSITION", e.to_string())
                }
                OrchestratorError::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                OrchestratorError::Capture(_) => {
                    (StatusCode::BAD_REQUEST, "CAPTURE_ERROR", e.to_string())
                }
                OrchestratorError::Sink(_) => {
                    (StatusCode::BAD_GATEWAY, "SINK_FAILURE", e.to_string())
                }
                OrchestratorError::InvariantViolation(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INVARIANT_VIOLATION",
                    e.to_string(),
                ),
                OrchestratorError::Timeout(_) => {
                    (StatusCode::REQUEST_TIMEOUT, "APPROVAL_TIMEOUT", e.to_string())
                }
            },
            AppError::Supervisor(e) => match e {
                SupervisorError::UnknownRequest(_) => {
                    (StatusCode::NOT_FOUND, "UNKNOWN_REQUEST", e.to_string())
                }
                SupervisorError::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
            },
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": uuid::Uuid::now_v7().to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (status, axum::Json(body)).into_response()
    }
}
