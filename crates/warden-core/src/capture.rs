//! Execution-state capture: canonical serialization, content hashing, and
//! state comparison.
//!
//! The serialized form is the basis for content-addressed checkpoint
//! artifacts, so it must be byte-stable: map keys are emitted in sorted
//! order (all payload bags are ordered maps) and timestamps are RFC 3339
//! UTC with a trailing `Z`. The same bytes always produce the same SHA-256
//! hash regardless of how the state was built up.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use warden_types::error::CaptureError;
use warden_types::workflow::ExecutionState;

// ---------------------------------------------------------------------------
// StateCapture
// ---------------------------------------------------------------------------

/// One entry in the capture history, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub size_bytes: usize,
}

/// Serializes, restores, hashes, and compares execution states.
///
/// Serialization is total for any valid [`ExecutionState`]; the only failure
/// mode is malformed input on the deserialize side.
#[derive(Debug, Default)]
pub struct StateCapture {
    history: Mutex<Vec<CaptureRecord>>,
}

impl StateCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a state to its canonical JSON bytes and record the capture.
    pub fn serialize(&self, state: &ExecutionState) -> Result<Vec<u8>, CaptureError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CaptureError::Serialize(e.to_string()))?;

        let record = CaptureRecord {
            checkpoint_id: state.checkpoint_id.clone(),
            timestamp: state.timestamp,
            content_hash: hash_bytes(&bytes),
            size_bytes: bytes.len(),
        };
        tracing::debug!(
            checkpoint_id = record.checkpoint_id.as_str(),
            size_bytes = record.size_bytes,
            "serialized execution state"
        );
        self.history.lock().unwrap().push(record);

        Ok(bytes)
    }

    /// Restore a state from its serialized form.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<ExecutionState, CaptureError> {
        serde_json::from_slice(bytes).map_err(|e| CaptureError::Deserialize(e.to_string()))
    }

    /// SHA-256 (lowercase hex) of the canonical serialization.
    ///
    /// Invariant under map insertion order: payload bags are ordered maps,
    /// so two equal states always hash identically.
    pub fn content_hash(&self, state: &ExecutionState) -> Result<String, CaptureError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CaptureError::Serialize(e.to_string()))?;
        Ok(hash_bytes(&bytes))
    }

    /// Compare two states. Debugging aid; not on the critical path.
    pub fn compare(&self, before: &ExecutionState, after: &ExecutionState) -> StateDiff {
        StateDiff {
            memory: map_diff(&before.agent_memory, &after.agent_memory),
            outputs: map_diff(&before.intermediate_outputs, &after.intermediate_outputs),
            resources: metric_diff(&before.resource_consumption, &after.resource_consumption),
            api_calls_added: after.api_calls.len().saturating_sub(before.api_calls.len()),
            decisions_added: after
                .decision_trace
                .len()
                .saturating_sub(before.decision_trace.len()),
        }
    }

    /// The capture history accumulated so far, oldest first.
    pub fn history(&self) -> Vec<CaptureRecord> {
        self.history.lock().unwrap().clone()
    }
}

/// SHA-256 lowercase hex digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}

// ---------------------------------------------------------------------------
// Diff types
// ---------------------------------------------------------------------------

/// Added/removed/changed keys between two map-shaped bags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl MapDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Differences between two execution states.
#[derive(Debug, Clone, Serialize)]
pub struct StateDiff {
    pub memory: MapDiff,
    pub outputs: MapDiff,
    pub resources: MapDiff,
    /// Growth in api-call count (floored at 0).
    pub api_calls_added: usize,
    /// Growth in decision-trace length (floored at 0).
    pub decisions_added: usize,
}

fn map_diff(
    before: &BTreeMap<String, serde_json::Value>,
    after: &BTreeMap<String, serde_json::Value>,
) -> MapDiff {
    MapDiff {
        added: after
            .keys()
            .filter(|k| !before.contains_key(*k))
            .cloned()
            .collect(),
        removed: before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect(),
        changed: before
            .iter()
            .filter(|(k, v)| after.get(*k).is_some_and(|other| other != *v))
            .map(|(k, _)| k.clone())
            .collect(),
    }
}

fn metric_diff(before: &BTreeMap<String, f64>, after: &BTreeMap<String, f64>) -> MapDiff {
    MapDiff {
        added: after
            .keys()
            .filter(|k| !before.contains_key(*k))
            .cloned()
            .collect(),
        removed: before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect(),
        changed: before
            .iter()
            .filter(|(k, v)| after.get(*k).is_some_and(|other| other != *v))
            .map(|(k, _)| k.clone())
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_state() -> ExecutionState {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let mut state = ExecutionState::new("plan", ts);
        state.agent_memory.insert("goal".to_string(), json!("research"));
        state.agent_memory.insert("step".to_string(), json!(1));
        state
            .intermediate_outputs
            .insert("outline".to_string(), json!(["intro", "body"]));
        state.decision_trace.push("chose breadth-first search".to_string());
        state.resource_consumption.insert("tokens_used".to_string(), 812.0);
        state
    }

    #[test]
    fn roundtrip_preserves_state() {
        let capture = StateCapture::new();
        let state = sample_state();
        let bytes = capture.serialize(&state).unwrap();
        let restored = capture.deserialize(&bytes).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn serialized_timestamp_has_trailing_z() {
        let capture = StateCapture::new();
        let bytes = capture.serialize(&sample_state()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("2025-03-14T09:26:53Z"));
    }

    #[test]
    fn hash_is_stable_under_insertion_order() {
        let capture = StateCapture::new();
        let a = sample_state();

        // Same content built in the opposite insertion order
        let ts = a.timestamp;
        let mut b = ExecutionState::new("plan", ts);
        b.resource_consumption.insert("tokens_used".to_string(), 812.0);
        b.decision_trace.push("chose breadth-first search".to_string());
        b.intermediate_outputs
            .insert("outline".to_string(), json!(["intro", "body"]));
        b.agent_memory.insert("step".to_string(), json!(1));
        b.agent_memory.insert("goal".to_string(), json!("research"));

        assert_eq!(
            capture.content_hash(&a).unwrap(),
            capture.content_hash(&b).unwrap()
        );
    }

    #[test]
    fn hash_changes_with_content() {
        let capture = StateCapture::new();
        let a = sample_state();
        let mut b = a.clone();
        b.agent_memory.insert("step".to_string(), json!(2));
        assert_ne!(
            capture.content_hash(&a).unwrap(),
            capture.content_hash(&b).unwrap()
        );
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let capture = StateCapture::new();
        let hash = capture.content_hash(&sample_state()).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn deserialize_rejects_garbage() {
        let capture = StateCapture::new();
        let err = capture.deserialize(b"not json").unwrap_err();
        assert!(matches!(err, CaptureError::Deserialize(_)));
    }

    #[test]
    fn compare_reports_all_bags() {
        let capture = StateCapture::new();
        let before = sample_state();
        let mut after = before.clone();
        after.agent_memory.insert("step".to_string(), json!(2)); // changed
        after.agent_memory.insert("phase".to_string(), json!("exec")); // added
        after.agent_memory.remove("goal"); // removed
        after.intermediate_outputs.insert("draft".to_string(), json!("..."));
        after.decision_trace.push("refined outline".to_string());
        after.resource_consumption.insert("tokens_used".to_string(), 1400.0);

        let diff = capture.compare(&before, &after);
        assert_eq!(diff.memory.added, vec!["phase"]);
        assert_eq!(diff.memory.removed, vec!["goal"]);
        assert_eq!(diff.memory.changed, vec!["step"]);
        assert_eq!(diff.outputs.added, vec!["draft"]);
        assert_eq!(diff.resources.changed, vec!["tokens_used"]);
        assert_eq!(diff.api_calls_added, 0);
        assert_eq!(diff.decisions_added, 1);
    }

    #[test]
    fn compare_deltas_floor_at_zero() {
        let capture = StateCapture::new();
        let mut before = sample_state();
        before.decision_trace.push("extra".to_string());
        let mut after = before.clone();
        after.decision_trace.clear();

        let diff = capture.compare(&before, &after);
        assert_eq!(diff.decisions_added, 0);
    }

    #[test]
    fn capture_history_accumulates() {
        let capture = StateCapture::new();
        let state = sample_state();
        capture.serialize(&state).unwrap();
        capture.serialize(&state).unwrap();

        let history = capture.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].checkpoint_id, "plan");
        assert_eq!(history[0].content_hash, history[1].content_hash);
    }
}
