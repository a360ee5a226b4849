//! Workflow domain types for Warden.
//!
//! Defines the workflow/checkpoint configuration structs (immutable after
//! creation), the captured [`ExecutionState`] value, content-addressed
//! [`CheckpointSnapshot`]s, and the mutable [`WorkflowExecution`] record
//! owned by the orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{ApprovalRequest, ApprovalResponse};
use crate::escrow::SettlementPolicy;

// ---------------------------------------------------------------------------
// Workflow state machine
// ---------------------------------------------------------------------------

/// States a workflow execution can be in.
///
/// Legal transitions are enforced by the orchestrator; any operation from an
/// illegal source state fails with `InvalidTransition` and leaves the state
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initialized,
    Executing,
    AwaitingApproval,
    RollingBack,
    Settling,
    Completed,
    Failed,
}

impl WorkflowState {
    /// Terminal states reject every further operation.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }
}

// ---------------------------------------------------------------------------
// Configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Configuration for a single checkpoint within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint ID, unique within the workflow.
    pub checkpoint_id: String,
    /// Human-readable checkpoint name.
    pub name: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: String,
    /// Whether a human decision gates advancement past this checkpoint.
    #[serde(default = "default_true")]
    pub requires_approval: bool,
    /// Approval window in seconds; expiry behaves as a rejection.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Whether a rejection at this checkpoint may trigger rollback.
    #[serde(default = "default_true")]
    pub can_rollback: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    300
}

/// Configuration for an entire workflow. Frozen once the workflow is
/// initialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Globally unique, opaque workflow ID supplied by the client.
    pub workflow_id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: String,
    /// Ordered checkpoint configurations. Must be non-empty.
    pub checkpoints: Vec<CheckpointConfig>,
    /// Amount locked in escrow at workflow start. Non-negative.
    pub escrow_amount: f64,
    /// Who posted the job.
    pub poster_id: String,
    /// Who executes the workflow.
    pub executor_id: String,
    /// Optional human supervisor receiving the supervision fee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor_id: Option<String>,
    /// Per-workflow settlement policy override (fee share).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementPolicy>,
}

// ---------------------------------------------------------------------------
// Execution state (captured per checkpoint)
// ---------------------------------------------------------------------------

/// A single recorded API call made by the executing agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    /// Unique call ID (used to match compensating actions).
    pub call_id: String,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
    /// What the call did.
    pub description: String,
    /// Whether the call mutated external state (and so needs an inverse).
    #[serde(default)]
    pub has_side_effects: bool,
    /// Arbitrary result payload. Opaque to the core.
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Complete agent execution state captured at a checkpoint.
///
/// Payload bags (`agent_memory`, `intermediate_outputs`, api-call results)
/// carry arbitrary JSON; the core treats them as opaque. Maps are ordered so
/// the canonical serialization (and therefore the content hash) is stable
/// under insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Checkpoint this state was captured at.
    pub checkpoint_id: String,
    /// Capture time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Agent's internal memory/context.
    #[serde(default)]
    pub agent_memory: BTreeMap<String, serde_json::Value>,
    /// Ordered history of API calls made so far.
    #[serde(default)]
    pub api_calls: Vec<ApiCallRecord>,
    /// Outputs produced so far.
    #[serde(default)]
    pub intermediate_outputs: BTreeMap<String, serde_json::Value>,
    /// Agent's decision reasoning, in order.
    #[serde(default)]
    pub decision_trace: Vec<String>,
    /// Resources consumed (metric name -> non-negative amount).
    #[serde(default)]
    pub resource_consumption: BTreeMap<String, f64>,
}

impl ExecutionState {
    /// Create an empty state for the given checkpoint at the given time.
    pub fn new(checkpoint_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            timestamp,
            agent_memory: BTreeMap::new(),
            api_calls: Vec::new(),
            intermediate_outputs: BTreeMap::new(),
            decision_trace: Vec::new(),
            resource_consumption: BTreeMap::new(),
        }
    }

    /// Total of all resource-consumption metrics.
    pub fn total_resource_consumption(&self) -> f64 {
        self.resource_consumption.values().sum()
    }

    /// IDs of recorded API calls flagged as side-effectful, in call order.
    pub fn side_effect_call_ids(&self) -> Vec<String> {
        self.api_calls
            .iter()
            .filter(|c| c.has_side_effects)
            .map(|c| c.call_id.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Checkpoint snapshot (immutable once created)
// ---------------------------------------------------------------------------

/// The persisted, content-addressed record of an [`ExecutionState`] at a
/// checkpoint. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// UUIDv7 snapshot ID.
    pub snapshot_id: Uuid,
    /// Owning workflow.
    pub workflow_id: String,
    /// Checkpoint this snapshot belongs to.
    pub checkpoint_id: String,
    /// The captured state.
    pub execution_state: ExecutionState,
    /// Whether this checkpoint gates on human approval.
    pub approval_required: bool,
    /// SHA-256 (hex) of the canonical serialization of `execution_state`.
    pub content_hash: String,
    /// When the snapshot was created.
    pub created_at: DateTime<Utc>,
    /// URI returned by the artifact sink, if the export succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_uri: Option<String>,
}

// ---------------------------------------------------------------------------
// Workflow execution (mutable; owned by the orchestrator)
// ---------------------------------------------------------------------------

/// Complete execution tracking for one workflow.
///
/// Created by `initialize`, mutated only by the orchestrator, sealed by
/// `complete` or `fail`. Snapshots and approval requests/responses are
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Workflow ID (copied from config for convenience).
    pub workflow_id: String,
    /// Frozen configuration.
    pub config: WorkflowConfig,
    /// Current state-machine state.
    pub current_state: WorkflowState,
    /// 0-based index of the checkpoint currently being executed. Equals
    /// `config.checkpoints.len()` only once all checkpoints are approved.
    pub current_checkpoint_index: usize,
    /// Snapshots in creation order.
    #[serde(default)]
    pub snapshots: Vec<CheckpointSnapshot>,
    /// Approval requests in creation order.
    #[serde(default)]
    pub approval_requests: Vec<ApprovalRequest>,
    /// Approval responses in submission order.
    #[serde(default)]
    pub approval_responses: Vec<ApprovalResponse>,
    /// Escrow lock handle returned by the escrow facility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_id: Option<String>,
    /// Sum of all escrow releases so far. Never exceeds `escrow_amount`.
    #[serde(default)]
    pub released_total: f64,
    /// When the execution was created.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason, set on terminal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl WorkflowExecution {
    /// Create a fresh execution in `Initialized` for the given config.
    pub fn new(config: WorkflowConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id: config.workflow_id.clone(),
            config,
            current_state: WorkflowState::Initialized,
            current_checkpoint_index: 0,
            snapshots: Vec::new(),
            approval_requests: Vec::new(),
            approval_responses: Vec::new(),
            escrow_id: None,
            released_total: 0.0,
            started_at,
            completed_at: None,
            error_message: None,
        }
    }

    /// The checkpoint config at the current index, if any remain.
    pub fn current_checkpoint(&self) -> Option<&CheckpointConfig> {
        self.config.checkpoints.get(self.current_checkpoint_index)
    }

    /// Find a snapshot on this workflow by ID.
    pub fn find_snapshot(&self, snapshot_id: Uuid) -> Option<&CheckpointSnapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    /// Find an approval request on this workflow by ID.
    pub fn find_request(&self, request_id: Uuid) -> Option<&ApprovalRequest> {
        self.approval_requests
            .iter()
            .find(|r| r.request_id == request_id)
    }

    /// Whether a request has already been matched by a response.
    pub fn is_request_resolved(&self, request_id: Uuid) -> bool {
        self.approval_responses
            .iter()
            .any(|r| r.request_id == request_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> WorkflowConfig {
        WorkflowConfig {
            workflow_id: "wf-research-1".to_string(),
            name: "research".to_string(),
            description: "Gather market data".to_string(),
            checkpoints: vec![
                CheckpointConfig {
                    checkpoint_id: "plan".to_string(),
                    name: "Plan".to_string(),
                    description: String::new(),
                    requires_approval: true,
                    timeout_seconds: 300,
                    can_rollback: true,
                },
                CheckpointConfig {
                    checkpoint_id: "execute".to_string(),
                    name: "Execute".to_string(),
                    description: String::new(),
                    requires_approval: true,
                    timeout_seconds: 600,
                    can_rollback: false,
                },
            ],
            escrow_amount: 100.0,
            poster_id: "poster-1".to_string(),
            executor_id: "executor-1".to_string(),
            supervisor_id: Some("supervisor-1".to_string()),
            settlement: None,
        }
    }

    #[test]
    fn workflow_state_serde_snake_case() {
        for (state, expected) in [
            (WorkflowState::Initialized, "\"initialized\""),
            (WorkflowState::AwaitingApproval, "\"awaiting_approval\""),
            (WorkflowState::RollingBack, "\"rolling_back\""),
            (WorkflowState::Failed, "\"failed\""),
        ] {
            assert_eq!(serde_json::to_string(&state).unwrap(), expected);
            let parsed: WorkflowState = serde_json::from_str(expected).unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(WorkflowState::Completed.is_terminal());
        assert!(WorkflowState::Failed.is_terminal());
        assert!(!WorkflowState::Executing.is_terminal());
        assert!(!WorkflowState::Settling.is_terminal());
    }

    #[test]
    fn checkpoint_config_defaults_from_json() {
        let json = r#"{"checkpoint_id": "cp-1", "name": "Plan"}"#;
        let config: CheckpointConfig = serde_json::from_str(json).unwrap();
        assert!(config.requires_approval);
        assert_eq!(config.timeout_seconds, 300);
        assert!(config.can_rollback);
        assert!(config.description.is_empty());
    }

    #[test]
    fn workflow_config_json_roundtrip() {
        let config = sample_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WorkflowConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.workflow_id, "wf-research-1");
        assert_eq!(parsed.checkpoints.len(), 2);
        assert_eq!(parsed.checkpoints[1].timeout_seconds, 600);
        assert_eq!(parsed.supervisor_id.as_deref(), Some("supervisor-1"));
    }

    #[test]
    fn execution_state_side_effect_call_ids() {
        let mut state = ExecutionState::new("plan", Utc::now());
        state.api_calls = vec![
            ApiCallRecord {
                call_id: "call-1".to_string(),
                timestamp: Utc::now(),
                description: "read config".to_string(),
                has_side_effects: false,
                result: json!(null),
            },
            ApiCallRecord {
                call_id: "call-2".to_string(),
                timestamp: Utc::now(),
                description: "post comment".to_string(),
                has_side_effects: true,
                result: json!({"comment_id": 7}),
            },
        ];
        assert_eq!(state.side_effect_call_ids(), vec!["call-2"]);
    }

    #[test]
    fn execution_state_resource_totals() {
        let mut state = ExecutionState::new("plan", Utc::now());
        state.resource_consumption.insert("tokens_used".to_string(), 1200.0);
        state.resource_consumption.insert("api_calls".to_string(), 4.0);
        assert_eq!(state.total_resource_consumption(), 1204.0);
    }

    #[test]
    fn execution_tracks_current_checkpoint() {
        let mut exec = WorkflowExecution::new(sample_config(), Utc::now());
        assert_eq!(exec.current_checkpoint().unwrap().checkpoint_id, "plan");
        exec.current_checkpoint_index = 1;
        assert_eq!(exec.current_checkpoint().unwrap().checkpoint_id, "execute");
        exec.current_checkpoint_index = 2;
        assert!(exec.current_checkpoint().is_none());
    }

    #[test]
    fn execution_json_roundtrip() {
        let exec = WorkflowExecution::new(sample_config(), Utc::now());
        let json = serde_json::to_string(&exec).unwrap();
        let parsed: WorkflowExecution = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.current_state, WorkflowState::Initialized);
        assert_eq!(parsed.current_checkpoint_index, 0);
        assert!(parsed.snapshots.is_empty());
        assert!(parsed.escrow_id.is_none());
    }
}
