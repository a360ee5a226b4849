//! Workflow lifecycle handlers for the REST API.
//!
//! Endpoints to create and start workflows, capture checkpoints (pausing
//! for approval when the checkpoint requires it), finalize rollbacks,
//! settle, complete, cancel, and inspect executions.

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_core::supervisor::{digest_context, summarize_state};
use warden_types::approval::ApprovalRequest;
use warden_types::workflow::{ExecutionState, WorkflowConfig, WorkflowExecution};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRollbackBody {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    pub snapshot_id: uuid::Uuid,
    pub checkpoint_id: String,
    pub durable: bool,
    pub artifact_uri: Option<String>,
    /// Present when the checkpoint gates on approval.
    pub approval_request: Option<ApprovalRequest>,
    /// Monitoring report computed for this capture.
    pub monitor: warden_core::monitor::MonitorReport,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows - Register a new workflow execution.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(config): Json<WorkflowConfig>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let started = Instant::now();
    let execution = state.orchestrator.initialize(config)?;
    Ok(ApiResponse::success(execution, started))
}

/// GET /api/v1/workflows - List all registered executions.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<WorkflowExecution>>> {
    let started = Instant::now();
    let executions = state.orchestrator.list().await;
    ApiResponse::success(executions, started)
}

/// GET /api/v1/workflows/{id} - Fetch one execution.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let started = Instant::now();
    let execution = state.orchestrator.get(&id).await?;
    Ok(ApiResponse::success(execution, started))
}

/// POST /api/v1/workflows/{id}/start - Lock escrow and begin executing.
pub async fn start_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let started = Instant::now();
    state.orchestrator.start(&id).await?;
    let execution = state.orchestrator.get(&id).await?;
    Ok(ApiResponse::success(execution, started))
}

/// POST /api/v1/workflows/{id}/checkpoints - Capture state at the current
/// checkpoint.
///
/// Runs the monitor over the submitted state, exports the snapshot, and --
/// when the checkpoint requires approval -- pauses the workflow and creates
/// the approval request (tracked by the supervisor adapter for the pull
/// API).
pub async fn create_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(execution_state): Json<ExecutionState>,
) -> Result<Json<ApiResponse<CheckpointResponse>>, AppError> {
    let started = Instant::now();

    let execution = state.orchestrator.get(&id).await?;
    let checkpoint = execution
        .current_checkpoint()
        .cloned()
        .ok_or_else(|| AppError::Validation("no checkpoint remaining".to_string()))?;

    let monitor_report =
        state
            .monitor
            .observe(&execution_state, &checkpoint, chrono::Utc::now());

    let outcome = state
        .orchestrator
        .create_checkpoint(&id, execution_state.clone())
        .await?;

    let approval_request = if checkpoint.requires_approval {
        let request = state
            .orchestrator
            .request_approval(
                &id,
                outcome.snapshot.snapshot_id,
                summarize_state(&execution_state, Some(&monitor_report)),
                digest_context(&execution_state, Some(&monitor_report)),
            )
            .await?;
        state.supervisor.track(request.clone());
        Some(request)
    } else {
        None
    };

    Ok(ApiResponse::success(
        CheckpointResponse {
            snapshot_id: outcome.snapshot.snapshot_id,
            checkpoint_id: outcome.snapshot.checkpoint_id.clone(),
            durable: outcome.durable,
            artifact_uri: outcome.snapshot.artifact_uri.clone(),
            approval_request,
            monitor: monitor_report,
        },
        started,
    ))
}

/// POST /api/v1/workflows/{id}/rollback/complete - Finalize a rollback.
pub async fn complete_rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRollbackBody>,
) -> Result<Json<ApiResponse<Option<ExecutionState>>>, AppError> {
    let started = Instant::now();
    let restore = state.orchestrator.complete_rollback(&id, body.success).await?;
    Ok(ApiResponse::success(restore, started))
}

/// POST /api/v1/workflows/{id}/reconcile - Run the compensating pipeline
/// for a rejected workflow.
pub async fn reconcile_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<ApiResponse<warden_core::rollback::ReconciliationReport>>, AppError> {
    let started = Instant::now();
    let report = state.orchestrator.reconcile(&id, &body.reason).await?;
    Ok(ApiResponse::success(report, started))
}

/// POST /api/v1/workflows/{id}/settle - Split escrow per the settlement
/// policy.
///
/// The body may carry the final execution state; when omitted, the latest
/// snapshot's state is used.
pub async fn settle_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ExecutionState>>,
) -> Result<Json<ApiResponse<warden_types::escrow::Settlement>>, AppError> {
    let started = Instant::now();

    let final_state = match body {
        Some(Json(s)) => s,
        None => state
            .orchestrator
            .get(&id)
            .await?
            .snapshots
            .last()
            .map(|s| s.execution_state.clone())
            .ok_or_else(|| AppError::Validation("no snapshots to settle from".to_string()))?,
    };

    let settlement = state.orchestrator.settle(&id, &final_state).await?;
    Ok(ApiResponse::success(settlement, started))
}

/// POST /api/v1/workflows/{id}/complete - Seal a settled workflow.
pub async fn complete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<WorkflowExecution>>, AppError> {
    let started = Instant::now();
    state.orchestrator.complete(&id).await?;
    let execution = state.orchestrator.get(&id).await?;
    Ok(ApiResponse::success(execution, started))
}

/// POST /api/v1/workflows/{id}/cancel - Cancel from any non-terminal state.
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<ApiResponse<Option<warden_core::rollback::ReconciliationReport>>>, AppError> {
    let started = Instant::now();
    let report = state.orchestrator.cancel(&id, &body.reason).await?;
    Ok(ApiResponse::success(report, started))
}

/// GET /api/v1/workflows/{id}/monitor - Monitoring report for the latest
/// snapshot against the current checkpoint.
pub async fn monitor_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let started = Instant::now();
    let execution = state.orchestrator.get(&id).await?;

    let Some(snapshot) = execution.snapshots.last() else {
        return Ok(ApiResponse::success(Value::Null, started));
    };
    let checkpoint = execution
        .config
        .checkpoints
        .iter()
        .find(|c| c.checkpoint_id == snapshot.checkpoint_id)
        .ok_or_else(|| AppError::Internal("snapshot references unknown checkpoint".to_string()))?;

    let report = state
        .monitor
        .observe(&snapshot.execution_state, checkpoint, chrono::Utc::now());
    let json = serde_json::to_value(report)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(ApiResponse::success(json, started))
}
