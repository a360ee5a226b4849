//! The workflow orchestrator: a finite-state machine over
//! [`WorkflowExecution`] driving capture, approval, rollback, and
//! settlement.
//!
//! # Concurrency
//!
//! Each workflow is a single logical thread of progress. Every operation on
//! a workflow id runs under that workflow's `tokio::Mutex`, so no two
//! transitions of the same workflow ever overlap; operations on distinct
//! workflows proceed in parallel. The registry itself is a `DashMap` whose
//! entries hold `Arc`s, so lookups never block unrelated workflows.
//!
//! # Determinism
//!
//! Timestamps come from an injected [`Clock`] and every state change is a
//! pure function of the operation arguments plus collaborator responses.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use warden_types::approval::{ApprovalDecision, ApprovalRequest, ApprovalResponse};
use warden_types::error::{OrchestratorError, ValidationError};
use warden_types::escrow::{Settlement, SettlementPolicy};
use warden_types::event::WorkflowEvent;
use warden_types::workflow::{
    CheckpointSnapshot, ExecutionState, WorkflowConfig, WorkflowExecution, WorkflowState,
};

use crate::capture::{StateCapture, hash_bytes};
use crate::clock::Clock;
use crate::event::EventBus;
use crate::rollback::{
    CompensatingAction, CompensationRegistry, InverseRunner, ReconciliationEngine,
    ReconciliationReport,
};
use crate::sink::{ArtifactSink, EscrowSink};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// What `submit_approval` did, beyond the recorded response.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub decision: ApprovalDecision,
    /// State the workflow landed in after the decision.
    pub next_state: WorkflowState,
    /// For MODIFIED: the snapshot state with modifications applied, for the
    /// executor to resume from. Snapshots themselves are never mutated.
    pub modified_state: Option<ExecutionState>,
    /// Modification keys that matched nothing and were ignored.
    pub ignored_modifications: Vec<String>,
}

/// What `create_checkpoint` produced.
#[derive(Debug, Clone)]
pub struct CheckpointOutcome {
    pub snapshot: CheckpointSnapshot,
    /// False when the artifact sink failed and durability is in-process
    /// only.
    pub durable: bool,
}

// ---------------------------------------------------------------------------
// Per-workflow runtime entry
// ---------------------------------------------------------------------------

/// Runtime state for one workflow: the serializable execution record plus
/// the in-process compensation registry and settlement bookkeeping.
struct WorkflowEntry {
    execution: WorkflowExecution,
    registry: CompensationRegistry,
    /// Settlements already executed, keyed by reason (idempotency).
    settlements: HashMap<String, Settlement>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns per-workflow lifecycle and enforces the transition table.
///
/// Generic over the sink ports and the inverse runner so tests and
/// deployments can pin any implementation.
pub struct Orchestrator<A, E, R>
where
    A: ArtifactSink,
    E: EscrowSink,
    R: InverseRunner,
{
    artifact_sink: A,
    escrow_sink: E,
    reconciler: ReconciliationEngine<R>,
    capture: StateCapture,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    settlement_policy: SettlementPolicy,
    workflows: DashMap<String, Arc<Mutex<WorkflowEntry>>>,
    /// Resolve-points: at most one waiter per pending request, completed
    /// exactly once when the matching response is submitted.
    waiters: DashMap<Uuid, oneshot::Sender<ApprovalResponse>>,
}

impl<A, E, R> Orchestrator<A, E, R>
where
    A: ArtifactSink,
    E: EscrowSink,
    R: InverseRunner,
{
    pub fn new(
        artifact_sink: A,
        escrow_sink: E,
        reconciler: ReconciliationEngine<R>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        settlement_policy: SettlementPolicy,
    ) -> Self {
        Self {
            artifact_sink,
            escrow_sink,
            reconciler,
            capture: StateCapture::new(),
            clock,
            event_bus,
            settlement_policy,
            workflows: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Create a new workflow execution from a config.
    ///
    /// Validates the config (non-empty checkpoints, unique checkpoint ids,
    /// non-negative escrow) and registers the execution in `Initialized`.
    pub fn initialize(
        &self,
        config: WorkflowConfig,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        if config.checkpoints.is_empty() {
            return Err(ValidationError::NoCheckpoints.into());
        }
        if config.escrow_amount < 0.0 {
            return Err(ValidationError::NegativeEscrow(config.escrow_amount).into());
        }
        let mut seen = std::collections::HashSet::new();
        for checkpoint in &config.checkpoints {
            if !seen.insert(checkpoint.checkpoint_id.as_str()) {
                return Err(
                    ValidationError::DuplicateCheckpoint(checkpoint.checkpoint_id.clone()).into(),
                );
            }
        }

        let workflow_id = config.workflow_id.clone();
        let execution = WorkflowExecution::new(config, self.clock.now());

        let entry = Arc::new(Mutex::new(WorkflowEntry {
            execution: execution.clone(),
            registry: CompensationRegistry::new(),
            settlements: HashMap::new(),
        }));

        match self.workflows.entry(workflow_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OrchestratorError::DuplicateWorkflow(workflow_id));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        tracing::info!(workflow_id = workflow_id.as_str(), "workflow initialized");
        self.event_bus.publish(WorkflowEvent::WorkflowInitialized {
            workflow_id,
            checkpoint_count: execution.config.checkpoints.len(),
            escrow_amount: execution.config.escrow_amount,
        });

        Ok(execution)
    }

    /// Transition `Initialized -> Executing`, locking escrow first.
    ///
    /// A lock failure moves the workflow to `Failed` with the reason
    /// propagated to the caller.
    pub async fn start(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Initialized, "start")?;

        let config = &guard.execution.config;
        let lock_result = self
            .escrow_sink
            .lock(
                workflow_id,
                config.escrow_amount,
                &config.poster_id,
                &config.executor_id,
            )
            .await;

        match lock_result {
            Ok(escrow_id) => {
                guard.execution.escrow_id = Some(escrow_id.clone());
                guard.execution.current_state = WorkflowState::Executing;
                tracing::info!(workflow_id, escrow_id = escrow_id.as_str(), "workflow started");
                self.event_bus.publish(WorkflowEvent::ExecutionStarted {
                    workflow_id: workflow_id.to_string(),
                    escrow_id: Some(escrow_id),
                });
                Ok(())
            }
            Err(err) => {
                let reason = format!("escrow lock failed: {err}");
                self.fail_locked(&mut guard.execution, &reason);
                Err(err.into())
            }
        }
    }

    /// Capture execution state at the current checkpoint.
    ///
    /// The snapshot is serialized and exported to the artifact sink; if the
    /// sink fails, the snapshot is still created locally with no URI and the
    /// outcome is flagged non-durable.
    pub async fn create_checkpoint(
        &self,
        workflow_id: &str,
        execution_state: ExecutionState,
    ) -> Result<CheckpointOutcome, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Executing, "create_checkpoint")?;

        let checkpoint = guard
            .execution
            .current_checkpoint()
            .ok_or_else(|| invalid(&guard.execution, "create_checkpoint"))?
            .clone();

        let bytes = self.capture.serialize(&execution_state)?;
        let content_hash = hash_bytes(&bytes);
        let snapshot_id = Uuid::now_v7();

        let metadata = BTreeMap::from([
            ("workflow_id".to_string(), workflow_id.to_string()),
            ("snapshot_id".to_string(), snapshot_id.to_string()),
            ("checkpoint_name".to_string(), checkpoint.name.clone()),
            (
                "approval_required".to_string(),
                checkpoint.requires_approval.to_string(),
            ),
        ]);

        // Sink failure degrades durability, never the checkpoint itself
        let artifact_uri = match self
            .artifact_sink
            .put("checkpoint_state", &bytes, metadata)
            .await
        {
            Ok(stored) => Some(stored.uri),
            Err(err) => {
                tracing::warn!(
                    workflow_id,
                    snapshot_id = %snapshot_id,
                    error = %err,
                    "artifact export failed, snapshot kept in-process only"
                );
                None
            }
        };
        let durable = artifact_uri.is_some();

        let snapshot = CheckpointSnapshot {
            snapshot_id,
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            execution_state,
            approval_required: checkpoint.requires_approval,
            content_hash,
            created_at: self.clock.now(),
            artifact_uri,
        };

        guard.execution.snapshots.push(snapshot.clone());
        tracing::info!(
            workflow_id,
            checkpoint_id = checkpoint.checkpoint_id.as_str(),
            snapshot_id = %snapshot_id,
            durable,
            "checkpoint created"
        );
        self.event_bus.publish(WorkflowEvent::CheckpointCreated {
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint.checkpoint_id,
            snapshot_id,
            durable,
        });

        Ok(CheckpointOutcome { snapshot, durable })
    }

    /// Pause at a snapshot and create the approval request.
    ///
    /// The request expires after the checkpoint's approval window; expiry is
    /// equivalent to a rejection.
    pub async fn request_approval(
        &self,
        workflow_id: &str,
        snapshot_id: Uuid,
        summary: String,
        context: BTreeMap<String, serde_json::Value>,
    ) -> Result<ApprovalRequest, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Executing, "request_approval")?;

        let snapshot = guard
            .execution
            .find_snapshot(snapshot_id)
            .ok_or(OrchestratorError::SnapshotNotFound(snapshot_id))?;

        if guard
            .execution
            .approval_requests
            .iter()
            .any(|r| r.snapshot_id == snapshot_id)
        {
            return Err(
                ValidationError::SnapshotAlreadyRequested(snapshot_id.to_string()).into(),
            );
        }

        let checkpoint_id = snapshot.checkpoint_id.clone();
        let timeout_seconds = guard
            .execution
            .config
            .checkpoints
            .iter()
            .find(|c| c.checkpoint_id == checkpoint_id)
            .map(|c| c.timeout_seconds)
            .unwrap_or(300);

        let created_at = self.clock.now();
        let request = ApprovalRequest {
            request_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint_id.clone(),
            snapshot_id,
            summary,
            context,
            created_at,
            expires_at: Some(created_at + chrono::Duration::seconds(timeout_seconds as i64)),
        };

        guard.execution.approval_requests.push(request.clone());
        guard.execution.current_state = WorkflowState::AwaitingApproval;

        tracing::info!(
            workflow_id,
            checkpoint_id = checkpoint_id.as_str(),
            request_id = %request.request_id,
            "approval requested"
        );
        self.event_bus.publish(WorkflowEvent::ApprovalRequested {
            workflow_id: workflow_id.to_string(),
            checkpoint_id,
            request_id: request.request_id,
        });

        Ok(request)
    }

    /// Apply a human decision to the awaited request.
    pub async fn submit_approval(
        &self,
        workflow_id: &str,
        response: ApprovalResponse,
    ) -> Result<ApprovalOutcome, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(
            &guard.execution,
            WorkflowState::AwaitingApproval,
            "submit_approval",
        )?;

        self.apply_response(&mut guard, response)
    }

    /// Expire the pending approval request if its window has elapsed.
    ///
    /// Returns the synthesized outcome when an expiry fired, `None` when the
    /// request is still live (or the workflow is not awaiting approval).
    pub async fn expire_approvals(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ApprovalOutcome>, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        if guard.execution.current_state != WorkflowState::AwaitingApproval {
            return Ok(None);
        }

        let now = self.clock.now();
        let expired = guard
            .execution
            .approval_requests
            .iter()
            .rev()
            .find(|r| !guard.execution.is_request_resolved(r.request_id))
            .filter(|r| r.expires_at.is_some_and(|deadline| now > deadline))
            .map(|r| r.request_id);

        let Some(request_id) = expired else {
            return Ok(None);
        };

        tracing::warn!(workflow_id, request_id = %request_id, "approval window elapsed");
        let response = ApprovalResponse {
            request_id,
            decision: ApprovalDecision::Rejected,
            rationale: "timeout".to_string(),
            modifications: None,
            approved_by: "system".to_string(),
            approved_at: now,
        };

        self.apply_response(&mut guard, response).map(Some)
    }

    /// Run the compensating pipeline for a workflow in `RollingBack`.
    ///
    /// Rolls back every side-effectful action recorded after the rejected
    /// checkpoint and computes the pro-rated payout recommendation. Call
    /// [`Orchestrator::complete_rollback`] with the report's success flag to
    /// finalize.
    pub async fn reconcile(
        &self,
        workflow_id: &str,
        rejection_reason: &str,
    ) -> Result<ReconciliationReport, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::RollingBack, "reconcile")?;

        let report = self
            .run_reconciliation(&mut guard, workflow_id, rejection_reason)
            .await;
        Ok(report)
    }

    /// Finalize a rollback.
    ///
    /// On success the checkpoint index moves back one (floored at 0) and
    /// execution resumes; the returned state, when present, is the snapshot
    /// the executor should restore from. On failure the workflow fails.
    /// Calling this twice is an `InvalidTransition`.
    pub async fn complete_rollback(
        &self,
        workflow_id: &str,
        success: bool,
    ) -> Result<Option<ExecutionState>, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::RollingBack, "complete_rollback")?;

        if success {
            let index = guard.execution.current_checkpoint_index.saturating_sub(1);
            guard.execution.current_checkpoint_index = index;
            guard.execution.current_state = WorkflowState::Executing;

            // Latest snapshot of the checkpoint we rolled back to, for the
            // executor to restore its in-memory state from
            let restore = guard
                .execution
                .config
                .checkpoints
                .get(index)
                .and_then(|checkpoint| {
                    guard
                        .execution
                        .snapshots
                        .iter()
                        .rev()
                        .find(|s| s.checkpoint_id == checkpoint.checkpoint_id)
                })
                .map(|s| s.execution_state.clone());

            tracing::info!(workflow_id, checkpoint_index = index, "rollback completed");
            Ok(restore)
        } else {
            self.fail_locked(&mut guard.execution, "Rollback failed");
            Ok(None)
        }
    }

    /// Execute settlement for a workflow in `Settling`.
    ///
    /// The clean path settles at ratio 1.0: the full escrow is split between
    /// executor and supervisor per the workflow's (or the process's)
    /// settlement policy. Idempotent by `(workflow_id, reason)`; a repeat
    /// call returns the recorded settlement without touching the sink. A
    /// sink failure leaves the workflow in `Settling` for operator retry.
    pub async fn settle(
        &self,
        workflow_id: &str,
        final_state: &ExecutionState,
    ) -> Result<Settlement, OrchestratorError> {
        const REASON: &str = "workflow_completion";

        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Settling, "settle")?;

        if let Some(existing) = guard.settlements.get(REASON) {
            tracing::debug!(workflow_id, "settlement already executed, returning recorded");
            return Ok(existing.clone());
        }

        let escrow_id = guard.execution.escrow_id.clone().ok_or_else(|| {
            OrchestratorError::InvariantViolation(format!(
                "workflow '{workflow_id}' reached settling without an escrow lock"
            ))
        })?;

        // Every checkpoint was approved to get here, so the payout ratio is
        // 1.0; the observed ratio is kept for telemetry only
        let completion_ratio = 1.0;
        let observed_ratio = self.reconciler.completion_ratio(final_state);
        tracing::debug!(workflow_id, observed_ratio, "settling on the clean path");
        let escrow_amount = guard.execution.config.escrow_amount;
        let total_payout = (escrow_amount * completion_ratio).min(escrow_amount);

        let remaining = escrow_amount - guard.execution.released_total;
        if total_payout > remaining {
            return Err(OrchestratorError::InvariantViolation(format!(
                "payout {total_payout} exceeds remaining escrow {remaining}"
            )));
        }

        let policy = guard
            .execution
            .config
            .settlement
            .unwrap_or(self.settlement_policy);
        let splits = policy.split(
            total_payout,
            &guard.execution.config.executor_id,
            guard.execution.config.supervisor_id.as_deref(),
            REASON,
        );

        self.escrow_sink.split(&escrow_id, &splits).await?;

        guard.execution.released_total += total_payout;
        guard.registry.clear();

        let settlement = Settlement {
            workflow_id: workflow_id.to_string(),
            escrow_id,
            completion_ratio,
            total_escrow: escrow_amount,
            total_payout,
            splits,
            settled_at: self.clock.now(),
        };
        guard.settlements.insert(REASON.to_string(), settlement.clone());

        tracing::info!(workflow_id, total_payout, "settlement executed");
        self.event_bus.publish(WorkflowEvent::SettlementExecuted {
            workflow_id: workflow_id.to_string(),
            total_payout,
            completion_ratio,
        });

        Ok(settlement)
    }

    /// Terminal transition `Settling -> Completed`.
    pub async fn complete(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Settling, "complete")?;

        guard.execution.current_state = WorkflowState::Completed;
        guard.execution.completed_at = Some(self.clock.now());
        tracing::info!(workflow_id, "workflow completed");
        self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id: workflow_id.to_string(),
        });
        Ok(())
    }

    /// Terminal transition to `Failed` from any non-terminal state.
    pub async fn fail(&self, workflow_id: &str, reason: &str) -> Result<(), OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        if guard.execution.current_state.is_terminal() {
            return Err(invalid(&guard.execution, "fail"));
        }
        self.fail_locked(&mut guard.execution, reason);
        Ok(())
    }

    /// Cancel from any non-terminal state.
    ///
    /// Fires the compensating pipeline exactly as a rejection would (subject
    /// to `can_rollback` on the current checkpoint), then fails the
    /// workflow. Returns the reconciliation report when a rollback ran.
    pub async fn cancel(
        &self,
        workflow_id: &str,
        reason: &str,
    ) -> Result<Option<ReconciliationReport>, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        if guard.execution.current_state.is_terminal() {
            return Err(invalid(&guard.execution, "cancel"));
        }

        let can_rollback = guard
            .execution
            .current_checkpoint()
            .map(|c| c.can_rollback)
            .unwrap_or(false);

        let report = if can_rollback && !guard.registry.is_empty() {
            Some(
                self.run_reconciliation(&mut guard, workflow_id, reason)
                    .await,
            )
        } else {
            None
        };

        self.fail_locked(&mut guard.execution, &format!("cancelled: {reason}"));
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Compensating transactions
    // -----------------------------------------------------------------------

    /// Record a side-effectful action performed by the executor, with the
    /// data needed to invert it. Only legal while `Executing`.
    pub async fn register_action(
        &self,
        workflow_id: &str,
        action_id: &str,
        action_type: &str,
        inverse: Option<CompensatingAction>,
    ) -> Result<(), OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;
        ensure_state(&guard.execution, WorkflowState::Executing, "register_action")?;

        guard.registry.register(action_id, action_type, inverse);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries and resolve-points
    // -----------------------------------------------------------------------

    /// Snapshot of the execution record.
    pub async fn get(&self, workflow_id: &str) -> Result<WorkflowExecution, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let guard = entry.lock().await;
        Ok(guard.execution.clone())
    }

    /// All registered executions, in no particular order.
    pub async fn list(&self) -> Vec<WorkflowExecution> {
        let entries: Vec<_> = self
            .workflows
            .iter()
            .map(|kv| Arc::clone(kv.value()))
            .collect();
        let mut executions = Vec::with_capacity(entries.len());
        for entry in entries {
            executions.push(entry.lock().await.execution.clone());
        }
        executions
    }

    /// A one-shot handle that resolves when the given request is decided.
    ///
    /// At most one response per request, delivered exactly once; a second
    /// handle for the same request replaces the first (whose receiver then
    /// errors).
    pub fn decision_handle(&self, request_id: Uuid) -> oneshot::Receiver<ApprovalResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id, tx);
        rx
    }

    /// Fetch a snapshot's execution state, verifying the artifact bytes when
    /// a URI is present.
    ///
    /// A content-hash mismatch is an invariant violation: the workflow is
    /// failed and the error returned. Snapshots without a URI return the
    /// in-process copy.
    pub async fn load_snapshot_state(
        &self,
        workflow_id: &str,
        snapshot_id: Uuid,
    ) -> Result<ExecutionState, OrchestratorError> {
        let entry = self.entry(workflow_id)?;
        let mut guard = entry.lock().await;

        let snapshot = guard
            .execution
            .find_snapshot(snapshot_id)
            .ok_or(OrchestratorError::SnapshotNotFound(snapshot_id))?
            .clone();

        let Some(uri) = snapshot.artifact_uri.as_deref() else {
            return Ok(snapshot.execution_state);
        };

        let bytes = self.artifact_sink.get(uri).await?;
        let actual_hash = hash_bytes(&bytes);
        if actual_hash != snapshot.content_hash {
            let reason = format!(
                "artifact content hash mismatch for snapshot {snapshot_id}: expected {}, got {actual_hash}",
                snapshot.content_hash
            );
            tracing::error!(workflow_id, reason = reason.as_str(), "invariant violation");
            if !guard.execution.current_state.is_terminal() {
                self.fail_locked(&mut guard.execution, &reason);
            }
            return Err(OrchestratorError::InvariantViolation(reason));
        }

        Ok(self.capture.deserialize(&bytes)?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn entry(&self, workflow_id: &str) -> Result<Arc<Mutex<WorkflowEntry>>, OrchestratorError> {
        self.workflows
            .get(workflow_id)
            .map(|kv| Arc::clone(kv.value()))
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Apply a validated response to the awaited request. Caller holds the
    /// entry lock and has verified the state is `AwaitingApproval`.
    fn apply_response(
        &self,
        guard: &mut WorkflowEntry,
        response: ApprovalResponse,
    ) -> Result<ApprovalOutcome, OrchestratorError> {
        response.validate()?;

        let request_id = response.request_id;
        if guard.execution.find_request(request_id).is_none() {
            return Err(OrchestratorError::RequestNotFound(request_id));
        }
        if guard.execution.is_request_resolved(request_id) {
            return Err(invalid(&guard.execution, "submit_approval"));
        }

        let workflow_id = guard.execution.workflow_id.clone();
        let decision = response.decision;
        guard.execution.approval_responses.push(response.clone());

        // Complete the resolve-point, if anyone is waiting
        if let Some((_, waiter)) = self.waiters.remove(&request_id) {
            let _ = waiter.send(response.clone());
        }

        let mut modified_state = None;
        let mut ignored_modifications = Vec::new();

        let next_state = match decision {
            ApprovalDecision::Approved => {
                guard.execution.current_checkpoint_index += 1;
                if guard.execution.current_checkpoint_index
                    >= guard.execution.config.checkpoints.len()
                {
                    tracing::info!(workflow_id = workflow_id.as_str(), "moving to settlement");
                    WorkflowState::Settling
                } else {
                    WorkflowState::Executing
                }
            }
            ApprovalDecision::Modified => {
                let snapshot_id = guard
                    .execution
                    .find_request(request_id)
                    .map(|r| r.snapshot_id)
                    .unwrap_or_default();
                if let Some(snapshot) = guard.execution.find_snapshot(snapshot_id) {
                    let modifications = response.modifications.as_ref().cloned().unwrap_or_default();
                    let (state, ignored) =
                        apply_modifications(&snapshot.execution_state, &modifications);
                    modified_state = Some(state);
                    ignored_modifications = ignored;
                }
                tracing::info!(
                    workflow_id = workflow_id.as_str(),
                    ignored = ignored_modifications.len(),
                    "continuing with modifications"
                );
                WorkflowState::Executing
            }
            ApprovalDecision::Rejected => {
                let can_rollback = guard
                    .execution
                    .current_checkpoint()
                    .map(|c| c.can_rollback)
                    .unwrap_or(false);
                if can_rollback {
                    let checkpoint_id = guard
                        .execution
                        .current_checkpoint()
                        .map(|c| c.checkpoint_id.clone())
                        .unwrap_or_default();
                    self.event_bus.publish(WorkflowEvent::RollbackStarted {
                        workflow_id: workflow_id.clone(),
                        checkpoint_id,
                        reason: response.rationale.clone(),
                    });
                    WorkflowState::RollingBack
                } else {
                    self.fail_locked(
                        &mut guard.execution,
                        "Approval rejected and rollback not permitted",
                    );
                    WorkflowState::Failed
                }
            }
        };

        if next_state != WorkflowState::Failed {
            guard.execution.current_state = next_state;
        }

        self.event_bus.publish(WorkflowEvent::ApprovalResolved {
            workflow_id,
            request_id,
            decision,
        });

        Ok(ApprovalOutcome {
            decision,
            next_state,
            modified_state,
            ignored_modifications,
        })
    }

    async fn run_reconciliation(
        &self,
        guard: &mut WorkflowEntry,
        workflow_id: &str,
        reason: &str,
    ) -> ReconciliationReport {
        // Reconcile against the latest snapshot; a workflow rejected before
        // any capture has nothing to undo and a zero completion ratio
        let state = guard
            .execution
            .snapshots
            .last()
            .map(|s| s.execution_state.clone())
            .unwrap_or_else(|| {
                let checkpoint_id = guard
                    .execution
                    .current_checkpoint()
                    .map(|c| c.checkpoint_id.clone())
                    .unwrap_or_default();
                ExecutionState::new(checkpoint_id, self.clock.now())
            });

        let escrow_amount = guard.execution.config.escrow_amount;
        let report = self
            .reconciler
            .reconcile(
                workflow_id,
                &state,
                reason,
                &mut guard.registry,
                escrow_amount,
                escrow_amount,
                self.clock.now(),
            )
            .await;

        self.event_bus.publish(WorkflowEvent::RollbackCompleted {
            workflow_id: workflow_id.to_string(),
            success: report.rollback_success,
            failed_actions: report
                .cleanup_actions
                .iter()
                .filter(|a| a.status == crate::rollback::CleanupStatus::Failed)
                .count(),
        });

        report
    }

    fn fail_locked(&self, execution: &mut WorkflowExecution, reason: &str) {
        execution.current_state = WorkflowState::Failed;
        execution.error_message = Some(reason.to_string());
        execution.completed_at = Some(self.clock.now());
        tracing::error!(
            workflow_id = execution.workflow_id.as_str(),
            reason,
            "workflow failed"
        );
        self.event_bus.publish(WorkflowEvent::WorkflowFailed {
            workflow_id: execution.workflow_id.clone(),
            error: reason.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_state(
    execution: &WorkflowExecution,
    expected: WorkflowState,
    event: &'static str,
) -> Result<(), OrchestratorError> {
    if execution.current_state == expected {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidTransition {
            workflow_id: execution.workflow_id.clone(),
            state: execution.current_state,
            event,
        })
    }
}

fn invalid(execution: &WorkflowExecution, event: &'static str) -> OrchestratorError {
    OrchestratorError::InvalidTransition {
        workflow_id: execution.workflow_id.clone(),
        state: execution.current_state,
        event,
    }
}

/// Shallow replacement of modification values into a snapshot's state.
///
/// Only keys already present in agent memory or intermediate outputs are
/// overwritten; unknown keys are collected and reported, never applied.
fn apply_modifications(
    state: &ExecutionState,
    modifications: &BTreeMap<String, serde_json::Value>,
) -> (ExecutionState, Vec<String>) {
    let mut updated = state.clone();
    let mut ignored = Vec::new();

    for (key, value) in modifications {
        if updated.agent_memory.contains_key(key) {
            updated.agent_memory.insert(key.clone(), value.clone());
        } else if updated.intermediate_outputs.contains_key(key) {
            updated
                .intermediate_outputs
                .insert(key.clone(), value.clone());
        } else {
            ignored.push(key.clone());
        }
    }

    (updated, ignored)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
