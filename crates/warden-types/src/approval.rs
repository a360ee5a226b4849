//! Approval handshake types.
//!
//! An [`ApprovalRequest`] is created when a workflow pauses at an
//! approval-required checkpoint; exactly one [`ApprovalResponse`] resolves
//! it. Both are immutable once created.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Human approval decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Modified,
}

/// Request for human approval at a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// UUIDv7 request ID.
    pub request_id: Uuid,
    /// Workflow being executed.
    pub workflow_id: String,
    /// Checkpoint requiring approval.
    pub checkpoint_id: String,
    /// Snapshot the decision is about.
    pub snapshot_id: Uuid,
    /// One-line human-readable summary of what needs approval.
    pub summary: String,
    /// Context digest for the decision (recent decisions, outputs, alerts).
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the approval window closes; expiry behaves as a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Human response to an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// The request being resolved.
    pub request_id: Uuid,
    /// The decision.
    pub decision: ApprovalDecision,
    /// Human explanation of the decision. Never empty.
    pub rationale: String,
    /// Shallow field replacements, present iff `decision == Modified`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<BTreeMap<String, serde_json::Value>>,
    /// Who made the decision.
    pub approved_by: String,
    /// When the decision was made.
    pub approved_at: DateTime<Utc>,
}

impl ApprovalResponse {
    /// Check the well-formedness rules: non-empty rationale, and a non-empty
    /// modifications map exactly when the decision is `Modified`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.rationale.trim().is_empty() {
            return Err(ValidationError::EmptyRationale);
        }
        match (self.decision, &self.modifications) {
            (ApprovalDecision::Modified, None) => Err(ValidationError::MissingModifications),
            (ApprovalDecision::Modified, Some(mods)) if mods.is_empty() => {
                Err(ValidationError::MissingModifications)
            }
            (ApprovalDecision::Approved | ApprovalDecision::Rejected, Some(_)) => {
                Err(ValidationError::UnexpectedModifications)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(
        decision: ApprovalDecision,
        rationale: &str,
        modifications: Option<BTreeMap<String, serde_json::Value>>,
    ) -> ApprovalResponse {
        ApprovalResponse {
            request_id: Uuid::now_v7(),
            decision,
            rationale: rationale.to_string(),
            modifications,
            approved_by: "supervisor-1".to_string(),
            approved_at: Utc::now(),
        }
    }

    #[test]
    fn approval_decision_serde() {
        assert_eq!(
            serde_json::to_string(&ApprovalDecision::Approved).unwrap(),
            "\"approved\""
        );
        let parsed: ApprovalDecision = serde_json::from_str("\"modified\"").unwrap();
        assert_eq!(parsed, ApprovalDecision::Modified);
    }

    #[test]
    fn validate_accepts_plain_approval() {
        assert!(response(ApprovalDecision::Approved, "looks good", None)
            .validate()
            .is_ok());
    }

    #[test]
    fn validate_rejects_empty_rationale() {
        let err = response(ApprovalDecision::Approved, "  ", None)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::EmptyRationale));
    }

    #[test]
    fn validate_requires_modifications_for_modified() {
        let err = response(ApprovalDecision::Modified, "tweak value", None)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::MissingModifications));

        let err = response(
            ApprovalDecision::Modified,
            "tweak value",
            Some(BTreeMap::new()),
        )
        .validate()
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingModifications));
    }

    #[test]
    fn validate_forbids_modifications_elsewhere() {
        let mods = BTreeMap::from([("value".to_string(), json!(10))]);
        let err = response(ApprovalDecision::Rejected, "unsafe", Some(mods))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnexpectedModifications));
    }

    #[test]
    fn modified_response_roundtrip() {
        let mods = BTreeMap::from([("value".to_string(), json!(10))]);
        let resp = response(ApprovalDecision::Modified, "lower the bid", Some(mods));
        assert!(resp.validate().is_ok());

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: ApprovalResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.decision, ApprovalDecision::Modified);
        assert_eq!(parsed.modifications.unwrap()["value"], json!(10));
    }
}
