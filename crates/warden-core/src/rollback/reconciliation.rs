//! Post-rejection reconciliation: rollback plus settlement math.
//!
//! Given a rejected checkpoint, the engine estimates how much of the work
//! was completed, replays compensating transactions for everything after the
//! checkpoint, and recommends an adjusted payout clamped to the escrow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_types::config::CompletionPolicy;
use warden_types::workflow::ExecutionState;

use super::registry::{ActionOutcome, CompensationRegistry, InverseRunner};

/// Reconciliation outcome for a rejected (or cancelled) workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub workflow_id: String,
    pub checkpoint_id: String,
    pub rejection_reason: String,
    pub timestamp: DateTime<Utc>,
    /// True iff every compensating transaction succeeded (or was skipped).
    pub rollback_success: bool,
    /// Estimated fraction of the work completed, in [0, 1].
    pub partial_completion: f64,
    /// `base_payout x ratio - resources`, clamped to [0, escrow].
    pub recommended_payout: f64,
    /// Per-action cleanup status in execution order.
    pub cleanup_actions: Vec<ActionOutcome>,
}

/// Computes completion ratios and drives the compensating rollback.
#[derive(Debug)]
pub struct ReconciliationEngine<R: InverseRunner> {
    runner: R,
    policy: CompletionPolicy,
}

impl<R: InverseRunner> ReconciliationEngine<R> {
    pub fn new(runner: R, policy: CompletionPolicy) -> Self {
        Self { runner, policy }
    }

    /// Estimate how much of the work an execution state represents.
    ///
    /// Mean of `min(observed/target, 1)` over the non-empty contributors
    /// (api calls, outputs, decisions); 0 when all three are empty.
    pub fn completion_ratio(&self, state: &ExecutionState) -> f64 {
        let mut factors = Vec::with_capacity(3);

        if !state.api_calls.is_empty() {
            factors.push((state.api_calls.len() as f64 / self.policy.api_calls_target as f64).min(1.0));
        }
        if !state.intermediate_outputs.is_empty() {
            factors.push(
                (state.intermediate_outputs.len() as f64 / self.policy.outputs_target as f64)
                    .min(1.0),
            );
        }
        if !state.decision_trace.is_empty() {
            factors.push(
                (state.decision_trace.len() as f64 / self.policy.decisions_target as f64).min(1.0),
            );
        }

        if factors.is_empty() {
            0.0
        } else {
            factors.iter().sum::<f64>() / factors.len() as f64
        }
    }

    /// Pro-rated payout for partially completed work.
    ///
    /// The resources consumed by the run (and its cleanup) are deducted from
    /// the pro-rata share; the result never leaves [0, escrow_amount].
    pub fn recommended_payout(
        &self,
        state: &ExecutionState,
        ratio: f64,
        base_payout: f64,
        escrow_amount: f64,
    ) -> f64 {
        let raw = base_payout * ratio - state.total_resource_consumption();
        raw.clamp(0.0, escrow_amount)
    }

    /// Full reconciliation pass for a rejected checkpoint.
    ///
    /// Rolls back every side-effectful action recorded after the checkpoint
    /// (the ids come from the state's api-call records) and computes the
    /// adjusted payout.
    pub async fn reconcile(
        &self,
        workflow_id: &str,
        state: &ExecutionState,
        rejection_reason: &str,
        registry: &mut CompensationRegistry,
        base_payout: f64,
        escrow_amount: f64,
        now: DateTime<Utc>,
    ) -> ReconciliationReport {
        tracing::info!(
            workflow_id,
            checkpoint_id = state.checkpoint_id.as_str(),
            rejection_reason,
            "reconciling workflow"
        );

        let partial_completion = self.completion_ratio(state);
        let actions_to_rollback = state.side_effect_call_ids();
        let rollback = registry.rollback(&actions_to_rollback, &self.runner).await;

        let recommended_payout =
            self.recommended_payout(state, partial_completion, base_payout, escrow_amount);

        tracing::info!(
            workflow_id,
            partial_completion,
            rollback_success = rollback.success,
            recommended_payout,
            "reconciliation complete"
        );

        ReconciliationReport {
            workflow_id: workflow_id.to_string(),
            checkpoint_id: state.checkpoint_id.clone(),
            rejection_reason: rejection_reason.to_string(),
            timestamp: now,
            rollback_success: rollback.success,
            partial_completion,
            recommended_payout,
            cleanup_actions: rollback.actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
