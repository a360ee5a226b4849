//! Approval handlers: the supervisor's pull API.
//!
//! Pending requests are listed in creation order; a decision submission is
//! validated by the supervisor adapter, then applied to the owning workflow
//! by the orchestrator.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::orchestrator::ApprovalOutcome;
use warden_core::supervisor::{DisplayDocument, SupervisorStats};
use warden_types::approval::{ApprovalDecision, ApprovalRequest};
use warden_types::error::OrchestratorError;
use warden_types::workflow::{ExecutionState, WorkflowState};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: ApprovalDecision,
    pub rationale: String,
    pub approved_by: String,
    #[serde(default)]
    pub modifications: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub decision: ApprovalDecision,
    pub next_state: WorkflowState,
    /// For MODIFIED decisions: the state the executor should resume from.
    pub modified_state: Option<ExecutionState>,
    pub ignored_modifications: Vec<String>,
}

impl From<ApprovalOutcome> for DecisionResponse {
    fn from(outcome: ApprovalOutcome) -> Self {
        Self {
            decision: outcome.decision,
            next_state: outcome.next_state,
            modified_state: outcome.modified_state,
            ignored_modifications: outcome.ignored_modifications,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/approvals - Pending requests in creation order.
pub async fn list_pending(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ApprovalRequest>>> {
    let started = Instant::now();
    ApiResponse::success(state.supervisor.pending_requests(), started)
}

/// GET /api/v1/approvals/{request_id} - Display-formatted request.
pub async fn get_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<ApiResponse<DisplayDocument>>, AppError> {
    let started = Instant::now();
    let request = state
        .supervisor
        .pending_requests()
        .into_iter()
        .find(|r| r.request_id == request_id)
        .ok_or(AppError::Orchestrator(OrchestratorError::RequestNotFound(
            request_id,
        )))?;
    Ok(ApiResponse::success(
        state.supervisor.format_for_display(&request),
        started,
    ))
}

/// POST /api/v1/approvals/{request_id} - Submit a decision.
pub async fn submit_decision(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ApiResponse<DecisionResponse>>, AppError> {
    let started = Instant::now();

    // The supervisor needs the workflow id before the request leaves its
    // pending set
    let workflow_id = state
        .supervisor
        .pending_requests()
        .into_iter()
        .find(|r| r.request_id == request_id)
        .map(|r| r.workflow_id)
        .ok_or(AppError::Orchestrator(OrchestratorError::RequestNotFound(
            request_id,
        )))?;

    let response = state.supervisor.submit_decision(
        request_id,
        body.decision,
        body.rationale,
        body.approved_by,
        body.modifications,
    )?;

    let outcome = state
        .orchestrator
        .submit_approval(&workflow_id, response)
        .await?;

    Ok(ApiResponse::success(outcome.into(), started))
}

/// POST /api/v1/workflows/{id}/approvals/expire - Expire an elapsed
/// approval window (also run periodically by the server's sweep task).
pub async fn expire_approvals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Option<DecisionResponse>>>, AppError> {
    let started = Instant::now();
    let outcome = state.orchestrator.expire_approvals(&id).await?;
    Ok(ApiResponse::success(outcome.map(Into::into), started))
}

/// GET /api/v1/supervisor/stats - Lifetime supervisor statistics.
pub async fn supervisor_stats(
    State(state): State<AppState>,
) -> Json<ApiResponse<SupervisorStats>> {
    let started = Instant::now();
    ApiResponse::success(state.supervisor.stats(), started)
}
