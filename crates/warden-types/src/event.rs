//! Event types for the Warden workflow event bus.
//!
//! `WorkflowEvent` is the unified event type broadcast as workflows move
//! through their lifecycle. All variants are Clone + Send + Sync for use
//! with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::ApprovalDecision;

/// Events emitted by the orchestrator at workflow lifecycle milestones.
///
/// Subscribers (API websockets, audit logging, demo output) receive every
/// event; publishing with no subscribers is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow execution was created.
    WorkflowInitialized {
        workflow_id: String,
        checkpoint_count: usize,
        escrow_amount: f64,
    },

    /// Escrow was locked and execution began.
    ExecutionStarted {
        workflow_id: String,
        escrow_id: Option<String>,
    },

    /// A checkpoint snapshot was captured.
    CheckpointCreated {
        workflow_id: String,
        checkpoint_id: String,
        snapshot_id: Uuid,
        /// Whether the snapshot was exported to the artifact sink.
        durable: bool,
    },

    /// The workflow paused for a human decision.
    ApprovalRequested {
        workflow_id: String,
        checkpoint_id: String,
        request_id: Uuid,
    },

    /// A decision resolved a pending request.
    ApprovalResolved {
        workflow_id: String,
        request_id: Uuid,
        decision: ApprovalDecision,
    },

    /// A rejection started the compensating-rollback pipeline.
    RollbackStarted {
        workflow_id: String,
        checkpoint_id: String,
        reason: String,
    },

    /// Rollback finished.
    RollbackCompleted {
        workflow_id: String,
        success: bool,
        failed_actions: usize,
    },

    /// Escrow was split between recipients.
    SettlementExecuted {
        workflow_id: String,
        total_payout: f64,
        completion_ratio: f64,
    },

    /// The workflow reached `Completed`.
    WorkflowCompleted { workflow_id: String },

    /// The workflow reached `Failed`.
    WorkflowFailed { workflow_id: String, error: String },
}

impl WorkflowEvent {
    /// The workflow this event concerns.
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowInitialized { workflow_id, .. }
            | WorkflowEvent::ExecutionStarted { workflow_id, .. }
            | WorkflowEvent::CheckpointCreated { workflow_id, .. }
            | WorkflowEvent::ApprovalRequested { workflow_id, .. }
            | WorkflowEvent::ApprovalResolved { workflow_id, .. }
            | WorkflowEvent::RollbackStarted { workflow_id, .. }
            | WorkflowEvent::RollbackCompleted { workflow_id, .. }
            | WorkflowEvent::SettlementExecuted { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. } => workflow_id,
        }
    }
}
