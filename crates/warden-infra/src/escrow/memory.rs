//! In-process escrow ledger.
//!
//! Enforces the same accounting the remote facility does: the sum of
//! releases from a lock never exceeds the locked amount. Used by demos and
//! tests, and as the default backend when no facility URL is configured.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use warden_core::sink::EscrowSink;
use warden_types::error::SinkError;
use warden_types::escrow::PaymentSplit;

/// One escrow lock and its release history.
#[derive(Debug, Clone)]
pub struct EscrowAccount {
    pub workflow_id: String,
    pub poster_id: String,
    pub executor_id: String,
    pub locked: f64,
    pub released: f64,
    pub releases: Vec<PaymentSplit>,
}

impl EscrowAccount {
    pub fn remaining(&self) -> f64 {
        self.locked - self.released
    }
}

/// DashMap-backed [`EscrowSink`]. Cloning shares the ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryEscrow {
    accounts: Arc<DashMap<String, EscrowAccount>>,
}

impl MemoryEscrow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect an account (for demo output and tests).
    pub fn account(&self, escrow_id: &str) -> Option<EscrowAccount> {
        self.accounts.get(escrow_id).map(|a| a.clone())
    }

    /// Claw back a previous release (compensating inverse).
    ///
    /// Idempotent per (recipient, reason): refunding a release that is no
    /// longer on the books is a no-op.
    pub fn refund(&self, escrow_id: &str, recipient_id: &str, reason: &str) -> Result<(), SinkError> {
        let mut account = self
            .accounts
            .get_mut(escrow_id)
            .ok_or_else(|| SinkError::Escrow(format!("unknown escrow '{escrow_id}'")))?;

        if let Some(pos) = account
            .releases
            .iter()
            .position(|r| r.recipient_id == recipient_id && r.reason == reason)
        {
            let release = account.releases.remove(pos);
            account.released -= release.amount;
            tracing::info!(
                escrow_id,
                recipient_id,
                amount = release.amount,
                "escrow release refunded"
            );
        }
        Ok(())
    }

    fn debit(
        account: &mut EscrowAccount,
        escrow_id: &str,
        splits: &[PaymentSplit],
    ) -> Result<(), SinkError> {
        let total: f64 = splits.iter().map(|s| s.amount).sum();
        let remaining = account.remaining();
        if total > remaining + f64::EPSILON {
            return Err(SinkError::Overdraw {
                escrow_id: escrow_id.to_string(),
                requested: total,
                remaining,
            });
        }
        account.released += total;
        account.releases.extend_from_slice(splits);
        Ok(())
    }
}

impl EscrowSink for MemoryEscrow {
    async fn lock(
        &self,
        workflow_id: &str,
        amount: f64,
        poster_id: &str,
        executor_id: &str,
    ) -> Result<String, SinkError> {
        if amount < 0.0 {
            return Err(SinkError::Escrow(format!(
                "cannot lock negative amount {amount}"
            )));
        }
        let escrow_id = format!("esc-{}", Uuid::now_v7());
        self.accounts.insert(
            escrow_id.clone(),
            EscrowAccount {
                workflow_id: workflow_id.to_string(),
                poster_id: poster_id.to_string(),
                executor_id: executor_id.to_string(),
                locked: amount,
                released: 0.0,
                releases: Vec::new(),
            },
        );
        tracing::info!(workflow_id, escrow_id = escrow_id.as_str(), amount, "escrow locked");
        Ok(escrow_id)
    }

    async fn release(
        &self,
        escrow_id: &str,
        amount: f64,
        recipient_id: &str,
        reason: &str,
    ) -> Result<(), SinkError> {
        let mut account = self
            .accounts
            .get_mut(escrow_id)
            .ok_or_else(|| SinkError::Escrow(format!("unknown escrow '{escrow_id}'")))?;

        let split = PaymentSplit {
            recipient_id: recipient_id.to_string(),
            amount,
            reason: reason.to_string(),
        };
        Self::debit(&mut account, escrow_id, std::slice::from_ref(&split))?;
        tracing::info!(escrow_id, recipient_id, amount, "escrow released");
        Ok(())
    }

    async fn split(&self, escrow_id: &str, splits: &[PaymentSplit]) -> Result<(), SinkError> {
        let mut account = self
            .accounts
            .get_mut(escrow_id)
            .ok_or_else(|| SinkError::Escrow(format!("unknown escrow '{escrow_id}'")))?;

        Self::debit(&mut account, escrow_id, splits)?;
        tracing::info!(escrow_id, recipients = splits.len(), "escrow split");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(recipient: &str, amount: f64) -> PaymentSplit {
        PaymentSplit {
            recipient_id: recipient.to_string(),
            amount,
            reason: "workflow_completion".to_string(),
        }
    }

    #[tokio::test]
    async fn lock_then_split_updates_ledger() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();

        ledger
            .split(
                &escrow_id,
                &[split("executor", 90.0), split("supervisor", 10.0)],
            )
            .await
            .unwrap();

        let account = ledger.account(&escrow_id).unwrap();
        assert_eq!(account.released, 100.0);
        assert_eq!(account.remaining(), 0.0);
        assert_eq!(account.releases.len(), 2);
    }

    #[tokio::test]
    async fn overdraw_is_rejected_atomically() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();

        let err = ledger
            .split(
                &escrow_id,
                &[split("executor", 90.0), split("supervisor", 20.0)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Overdraw { .. }));

        // Nothing was released on the failed attempt
        let account = ledger.account(&escrow_id).unwrap();
        assert_eq!(account.released, 0.0);
        assert!(account.releases.is_empty());
    }

    #[tokio::test]
    async fn release_accumulates_toward_the_cap() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();

        ledger.release(&escrow_id, 60.0, "executor", "milestone_1").await.unwrap();
        ledger.release(&escrow_id, 40.0, "executor", "milestone_2").await.unwrap();
        let err = ledger
            .release(&escrow_id, 0.01, "executor", "milestone_3")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Overdraw { .. }));
    }

    #[tokio::test]
    async fn refund_is_idempotent() {
        let ledger = MemoryEscrow::new();
        let escrow_id = ledger.lock("wf-1", 100.0, "poster", "executor").await.unwrap();
        ledger.release(&escrow_id, 25.0, "executor", "milestone_1").await.unwrap();

        ledger.refund(&escrow_id, "executor", "milestone_1").unwrap();
        assert_eq!(ledger.account(&escrow_id).unwrap().released, 0.0);

        // Second refund of the same release is a no-op
        ledger.refund(&escrow_id, "executor", "milestone_1").unwrap();
        assert_eq!(ledger.account(&escrow_id).unwrap().released, 0.0);
    }

    #[tokio::test]
    async fn unknown_escrow_errors() {
        let ledger = MemoryEscrow::new();
        let err = ledger
            .release("esc-ghost", 1.0, "executor", "r")
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Escrow(_)));
    }
}
