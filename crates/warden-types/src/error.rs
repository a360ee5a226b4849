use thiserror::Error;
use uuid::Uuid;

use crate::workflow::WorkflowState;

/// Errors from the workflow orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow '{workflow_id}' cannot {event} from state '{state:?}'")]
    InvalidTransition {
        workflow_id: String,
        state: WorkflowState,
        event: &'static str,
    },

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("snapshot '{0}' not found")]
    SnapshotNotFound(Uuid),

    #[error("approval request '{0}' not found")]
    RequestNotFound(Uuid),

    #[error("workflow '{0}' already registered")]
    DuplicateWorkflow(String),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("sink failure: {0}")]
    Sink(#[from] SinkError),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("approval window elapsed for request '{0}'")]
    Timeout(Uuid),
}

/// Ill-formed inputs rejected before any state change.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("workflow must declare at least one checkpoint")]
    NoCheckpoints,

    #[error("escrow amount must be non-negative, got {0}")]
    NegativeEscrow(f64),

    #[error("duplicate checkpoint id '{0}'")]
    DuplicateCheckpoint(String),

    #[error("snapshot '{0}' already has an approval request")]
    SnapshotAlreadyRequested(String),

    #[error("rationale must not be empty")]
    EmptyRationale,

    #[error("a modified decision requires a non-empty modifications map")]
    MissingModifications,

    #[error("only a modified decision may carry modifications")]
    UnexpectedModifications,
}

/// Failures from the artifact or escrow sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("artifact store error: {0}")]
    Artifact(String),

    #[error("escrow facility error: {0}")]
    Escrow(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("escrow '{escrow_id}' release of {requested} exceeds remaining {remaining}")]
    Overdraw {
        escrow_id: String,
        requested: f64,
        remaining: f64,
    },
}

/// Errors from state capture (de)serialization.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to serialize execution state: {0}")]
    Serialize(String),

    #[error("failed to deserialize execution state: {0}")]
    Deserialize(String),
}

/// Errors from the supervisor adapter.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("approval request '{0}' is not pending")]
    UnknownRequest(Uuid),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let err = OrchestratorError::InvalidTransition {
            workflow_id: "wf-1".to_string(),
            state: WorkflowState::Completed,
            event: "start",
        };
        let msg = err.to_string();
        assert!(msg.contains("wf-1"));
        assert!(msg.contains("start"));
        assert!(msg.contains("Completed"));
    }

    #[test]
    fn overdraw_display() {
        let err = SinkError::Overdraw {
            escrow_id: "esc-1".to_string(),
            requested: 120.0,
            remaining: 100.0,
        };
        assert!(err.to_string().contains("120"));
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn validation_error_wraps_into_orchestrator_error() {
        let err: OrchestratorError = ValidationError::NoCheckpoints.into();
        assert!(err.to_string().contains("at least one checkpoint"));
    }
}
