//! Escrow settlement value types.
//!
//! Settlement distributes the locked escrow between executor and supervisor
//! pro-rata to the completion ratio. The fee share is a policy knob,
//! overridable per workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recipient's share of an escrow payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub recipient_id: String,
    pub amount: f64,
    /// Reason attached to the release (also the idempotency key component).
    pub reason: String,
}

/// How a payout is divided between executor and supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementPolicy {
    /// Supervisor's share of the payout, in [0, 1]. Default 0.10.
    #[serde(default = "default_supervisor_fee")]
    pub supervisor_fee: f64,
}

fn default_supervisor_fee() -> f64 {
    0.10
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            supervisor_fee: default_supervisor_fee(),
        }
    }
}

impl SettlementPolicy {
    /// Divide `payout` between executor and (optional) supervisor.
    ///
    /// With no supervisor the full payout goes to the executor; the fee
    /// share is not burned. The split amounts always sum to `payout`.
    pub fn split(
        &self,
        payout: f64,
        executor_id: &str,
        supervisor_id: Option<&str>,
        reason: &str,
    ) -> Vec<PaymentSplit> {
        match supervisor_id {
            Some(supervisor) => {
                let fee = payout * self.supervisor_fee;
                vec![
                    PaymentSplit {
                        recipient_id: executor_id.to_string(),
                        amount: payout - fee,
                        reason: reason.to_string(),
                    },
                    PaymentSplit {
                        recipient_id: supervisor.to_string(),
                        amount: fee,
                        reason: format!("{reason}_supervision"),
                    },
                ]
            }
            None => vec![PaymentSplit {
                recipient_id: executor_id.to_string(),
                amount: payout,
                reason: reason.to_string(),
            }],
        }
    }
}

/// Final settlement computed for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub workflow_id: String,
    /// Escrow lock handle the splits were drawn from.
    pub escrow_id: String,
    /// Partial-completion ratio the payout was scaled by.
    pub completion_ratio: f64,
    /// Amount originally locked.
    pub total_escrow: f64,
    /// Sum of all splits. Never exceeds `total_escrow`.
    pub total_payout: f64,
    pub splits: Vec<PaymentSplit>,
    pub settled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fee_is_ten_percent() {
        let policy = SettlementPolicy::default();
        assert_eq!(policy.supervisor_fee, 0.10);
    }

    #[test]
    fn split_with_supervisor_conserves_payout() {
        let policy = SettlementPolicy::default();
        let splits = policy.split(100.0, "executor-1", Some("supervisor-1"), "completion");
        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].amount, 90.0);
        assert_eq!(splits[1].amount, 10.0);
        let total: f64 = splits.iter().map(|s| s.amount).sum();
        assert_eq!(total, 100.0);
    }

    #[test]
    fn split_without_supervisor_pays_executor_everything() {
        let policy = SettlementPolicy::default();
        let splits = policy.split(100.0, "executor-1", None, "completion");
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].recipient_id, "executor-1");
        assert_eq!(splits[0].amount, 100.0);
    }

    #[test]
    fn custom_fee_from_toml() {
        let policy: SettlementPolicy = toml::from_str("supervisor_fee = 0.25").unwrap();
        let splits = policy.split(80.0, "e", Some("s"), "completion");
        assert_eq!(splits[0].amount, 60.0);
        assert_eq!(splits[1].amount, 20.0);
    }
}
