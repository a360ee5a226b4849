//! Compensating-transaction registry.
//!
//! Every side-effectful action the executor performs is registered here
//! together with the data needed to invert it. When an approval is rejected
//! (or a workflow cancelled), the registry replays the inverses in reverse
//! registration order: undo the most recent action first, never
//! short-circuit on failure, and report per-action status.
//!
//! Inverses are modeled as tagged data variants rather than live closures so
//! nothing uncapturable ends up in persisted state; an [`InverseRunner`]
//! dispatches on the variant to perform the actual undo.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Compensating actions
// ---------------------------------------------------------------------------

/// The data needed to undo one side-effectful action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompensatingAction {
    /// Undo an external API call (e.g. delete the created resource).
    ApiCall {
        description: String,
        /// Payload recorded at call time, handed back to the inverse.
        payload: serde_json::Value,
    },
    /// Remove or tombstone a written artifact.
    ArtifactWrite { uri: String },
    /// Claw back an escrow release.
    EscrowRelease {
        escrow_id: String,
        amount: f64,
        recipient_id: String,
    },
    /// Caller-defined inverse, dispatched by type name.
    Custom {
        action_type: String,
        payload: serde_json::Value,
    },
}

/// Executes the inverse of a [`CompensatingAction`].
///
/// Implementations must be idempotent given the same action payload: the
/// registry guards against double invocation, but a crashed retry may still
/// replay an inverse whose effect already landed.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait InverseRunner: Send + Sync {
    fn invert(
        &self,
        action_id: &str,
        action: &CompensatingAction,
    ) -> impl std::future::Future<Output = Result<(), RollbackError>> + Send;
}

/// Inverse runner that treats every action as trivially undoable.
///
/// Used when the deployment has no external side effects to unwind, and as
/// the default in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInverseRunner;

impl InverseRunner for NoopInverseRunner {
    async fn invert(&self, _action_id: &str, _action: &CompensatingAction) -> Result<(), RollbackError> {
        Ok(())
    }
}

/// Failure of a single inverse.
#[derive(Debug, Error)]
#[error("inverse for action '{action_id}' failed: {reason}")]
pub struct RollbackError {
    pub action_id: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One registered action and its execution bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAction {
    pub action_id: String,
    pub action_type: String,
    /// `None` means the action needs no undo (recorded as skipped).
    pub inverse: Option<CompensatingAction>,
    /// Flipped to true *before* the inverse runs, so a retry can never
    /// execute the same inverse twice.
    pub executed: bool,
    /// Outcome, present once `executed`.
    pub succeeded: Option<bool>,
}

/// What happened to one action during rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    /// Inverse ran and succeeded.
    Reversed,
    /// Inverse ran and failed.
    Failed,
    /// No inverse registered (counted as success).
    Skipped,
}

/// Per-action rollback outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub status: CleanupStatus,
}

/// Result of a full rollback pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    /// True iff no inverse failed.
    pub success: bool,
    /// Outcomes in execution (reverse-registration) order.
    pub actions: Vec<ActionOutcome>,
}

impl RollbackReport {
    pub fn failed_action_ids(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter(|a| a.status == CleanupStatus::Failed)
            .map(|a| a.action_id.clone())
            .collect()
    }
}

/// Registry of compensating transactions for one workflow.
///
/// Actions are kept in registration order; rollback walks them in reverse.
/// The registry is discarded after successful settlement.
#[derive(Debug, Default)]
pub struct CompensationRegistry {
    actions: Vec<RegisteredAction>,
}

impl CompensationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action that may need to be undone later. Call before
    /// executing anything with side effects.
    pub fn register(
        &mut self,
        action_id: impl Into<String>,
        action_type: impl Into<String>,
        inverse: Option<CompensatingAction>,
    ) {
        let action_id = action_id.into();
        let action_type = action_type.into();
        tracing::debug!(
            action_id = action_id.as_str(),
            action_type = action_type.as_str(),
            has_inverse = inverse.is_some(),
            "registered compensating transaction"
        );
        self.actions.push(RegisteredAction {
            action_id,
            action_type,
            inverse,
            executed: false,
            succeeded: None,
        });
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All registered action ids, in registration order.
    pub fn action_ids(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.action_id.clone()).collect()
    }

    /// Undo the given actions in reverse registration order.
    ///
    /// Best-effort all-or-nothing: failures never stop the loop; the report
    /// lists every outcome and `success` is true only when no inverse
    /// failed. Each action's `executed` flag is set before its inverse runs,
    /// so re-invoking rollback can never run the same inverse twice -- an
    /// already-executed action just replays its recorded outcome.
    pub async fn rollback<R: InverseRunner>(
        &mut self,
        action_ids: &[String],
        runner: &R,
    ) -> RollbackReport {
        let wanted: std::collections::HashSet<&str> =
            action_ids.iter().map(String::as_str).collect();

        let mut outcomes = Vec::new();
        for idx in (0..self.actions.len()).rev() {
            if !wanted.contains(self.actions[idx].action_id.as_str()) {
                continue;
            }

            let status = match &self.actions[idx].inverse {
                None => {
                    self.actions[idx].executed = true;
                    self.actions[idx].succeeded = Some(true);
                    CleanupStatus::Skipped
                }
                Some(_) if self.actions[idx].executed => {
                    // Replay the recorded outcome, never the inverse itself
                    match self.actions[idx].succeeded {
                        Some(true) => CleanupStatus::Reversed,
                        _ => CleanupStatus::Failed,
                    }
                }
                Some(inverse) => {
                    let inverse = inverse.clone();
                    let action_id = self.actions[idx].action_id.clone();
                    self.actions[idx].executed = true;
                    match runner.invert(&action_id, &inverse).await {
                        Ok(()) => {
                            self.actions[idx].succeeded = Some(true);
                            CleanupStatus::Reversed
                        }
                        Err(err) => {
                            tracing::error!(
                                action_id = action_id.as_str(),
                                error = %err,
                                "compensating transaction failed"
                            );
                            self.actions[idx].succeeded = Some(false);
                            CleanupStatus::Failed
                        }
                    }
                }
            };

            outcomes.push(ActionOutcome {
                action_id: self.actions[idx].action_id.clone(),
                status,
            });
        }

        // Ids that were requested but never registered count as skipped
        let registered: std::collections::HashSet<&str> =
            self.actions.iter().map(|a| a.action_id.as_str()).collect();
        for id in action_ids {
            if !registered.contains(id.as_str()) {
                tracing::warn!(action_id = id.as_str(), "no transaction registered for action");
                outcomes.push(ActionOutcome {
                    action_id: id.clone(),
                    status: CleanupStatus::Skipped,
                });
            }
        }

        let success = outcomes.iter().all(|o| o.status != CleanupStatus::Failed);
        RollbackReport {
            success,
            actions: outcomes,
        }
    }

    /// Drop all registered transactions (after successful settlement).
    pub fn clear(&mut self) {
        let count = self.actions.len();
        self.actions.clear();
        tracing::debug!(count, "cleared compensating transactions");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
