//! Inverse runners: the infrastructure side of compensating transactions.
//!
//! The core's registry records *what* to undo; these runners know *how*.
//! [`LedgerInverseRunner`] claws escrow releases back out of the in-process
//! ledger; other action kinds have no external state to unwind here and are
//! acknowledged as no-ops (content-addressed artifacts are immutable, and
//! API-call inverses belong to the executor collaborator that made them).

use warden_core::rollback::{CompensatingAction, InverseRunner, RollbackError};

use crate::escrow::MemoryEscrow;

/// Inverse runner over the in-process escrow ledger.
#[derive(Debug, Clone)]
pub struct LedgerInverseRunner {
    ledger: MemoryEscrow,
}

impl LedgerInverseRunner {
    pub fn new(ledger: MemoryEscrow) -> Self {
        Self { ledger }
    }
}

impl InverseRunner for LedgerInverseRunner {
    async fn invert(
        &self,
        action_id: &str,
        action: &CompensatingAction,
    ) -> Result<(), RollbackError> {
        match action {
            CompensatingAction::EscrowRelease {
                escrow_id,
                recipient_id,
                ..
            } => self
                .ledger
                .refund(escrow_id, recipient_id, action_id)
                .map_err(|e| RollbackError {
                    action_id: action_id.to_string(),
                    reason: e.to_string(),
                }),
            CompensatingAction::ApiCall { description, .. } => {
                tracing::info!(action_id, description, "api-call inverse acknowledged");
                Ok(())
            }
            CompensatingAction::ArtifactWrite { uri } => {
                // Content-addressed artifacts are immutable; nothing to undo
                tracing::debug!(action_id, uri, "artifact write needs no inverse");
                Ok(())
            }
            CompensatingAction::Custom { action_type, .. } => {
                tracing::warn!(action_id, action_type, "no inverse handler, treating as no-op");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::sink::EscrowSink;

    #[tokio::test]
    async fn escrow_release_inverse_refunds_ledger() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();
        ledger
            .release(&escrow_id, 30.0, "executor", "act-1")
            .await
            .unwrap();

        let runner = LedgerInverseRunner::new(ledger.clone());
        runner
            .invert(
                "act-1",
                &CompensatingAction::EscrowRelease {
                    escrow_id: escrow_id.clone(),
                    amount: 30.0,
                    recipient_id: "executor".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(ledger.account(&escrow_id).unwrap().released, 0.0);
    }

    #[tokio::test]
    async fn escrow_inverse_is_idempotent() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();
        ledger
            .release(&escrow_id, 30.0, "executor", "act-1")
            .await
            .unwrap();

        let runner = LedgerInverseRunner::new(ledger.clone());
        let action = CompensatingAction::EscrowRelease {
            escrow_id: escrow_id.clone(),
            amount: 30.0,
            recipient_id: "executor".to_string(),
        };
        runner.invert("act-1", &action).await.unwrap();
        runner.invert("act-1", &action).await.unwrap();

        assert_eq!(ledger.account(&escrow_id).unwrap().released, 0.0);
    }

    #[tokio::test]
    async fn unknown_escrow_inverse_fails() {
        let runner = LedgerInverseRunner::new(MemoryEscrow::new());
        let err = runner
            .invert(
                "act-1",
                &CompensatingAction::EscrowRelease {
                    escrow_id: "esc-ghost".to_string(),
                    amount: 1.0,
                    recipient_id: "executor".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("act-1"));
    }

    #[tokio::test]
    async fn non_escrow_actions_are_noops() {
        let runner = LedgerInverseRunner::new(MemoryEscrow::new());
        runner
            .invert(
                "act-2",
                &CompensatingAction::ArtifactWrite {
                    uri: "warden://artifacts/abc".to_string(),
                },
            )
            .await
            .unwrap();
        runner
            .invert(
                "act-3",
                &CompensatingAction::Custom {
                    action_type: "notify".to_string(),
                    payload: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
    }
}
