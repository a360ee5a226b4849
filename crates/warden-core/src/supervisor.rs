//! Supervisor adapter: turns raw snapshots into reviewable approval
//! requests and validates human decisions back into the system.
//!
//! The adapter never exposes raw API-call payloads to the reviewer -- only
//! descriptions, side-effect flags, and timestamps. Decisions are validated
//! (pending request, rationale, modification rules) before an
//! [`ApprovalResponse`] is produced.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_types::approval::{ApprovalDecision, ApprovalRequest, ApprovalResponse};
use warden_types::error::SupervisorError;
use warden_types::workflow::ExecutionState;

use crate::clock::Clock;
use crate::monitor::MonitorReport;

// ---------------------------------------------------------------------------
// Display types
// ---------------------------------------------------------------------------

/// How a display section should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Text,
    List,
    Json,
    Alerts,
    Decision,
}

/// One titled section of a formatted approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySection {
    pub title: String,
    pub kind: SectionKind,
    pub body: serde_json::Value,
}

/// Display-ready arrangement of an approval request, suitable for any UI
/// binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayDocument {
    pub request_id: Uuid,
    pub workflow_id: String,
    pub checkpoint_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub summary: String,
    pub sections: Vec<DisplaySection>,
}

/// Lifetime statistics for one supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub supervisor_id: String,
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub modified: usize,
    /// approved / total; 0 when no decisions yet.
    pub approval_rate: f64,
    /// Mean request-to-response latency in seconds.
    pub average_response_secs: f64,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Interfaces between the orchestrator and a human supervisor.
pub struct Supervisor {
    supervisor_id: String,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<Uuid, ApprovalRequest>>,
    history: Mutex<Vec<HistoryEntry>>,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    response: ApprovalResponse,
    response_secs: f64,
}

impl Supervisor {
    pub fn new(supervisor_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            supervisor_id: supervisor_id.into(),
            clock,
            pending: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn supervisor_id(&self) -> &str {
        &self.supervisor_id
    }

    /// Build an approval request from a snapshot's execution state.
    ///
    /// The summary is a single line; the context digest carries the last 5
    /// decisions, the last 5 api-call records (description, side-effect
    /// flag, timestamp only), all intermediate outputs, resource totals, and
    /// any attached monitoring report.
    pub fn create_request(
        &self,
        workflow_id: &str,
        checkpoint_id: &str,
        snapshot_id: Uuid,
        state: &ExecutionState,
        monitor_report: Option<&MonitorReport>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> ApprovalRequest {
        let request = ApprovalRequest {
            request_id: Uuid::now_v7(),
            workflow_id: workflow_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            snapshot_id,
            summary: summarize_state(state, monitor_report),
            context: digest_context(state, monitor_report),
            created_at: self.clock.now(),
            expires_at,
        };

        tracing::info!(
            request_id = %request.request_id,
            workflow_id,
            checkpoint_id,
            "approval request created"
        );

        self.pending
            .lock()
            .unwrap()
            .insert(request.request_id, request.clone());
        request
    }

    /// Arrange a request into titled sections for rendering.
    pub fn format_for_display(&self, request: &ApprovalRequest) -> DisplayDocument {
        let mut sections = vec![DisplaySection {
            title: "Summary".to_string(),
            kind: SectionKind::Text,
            body: serde_json::Value::String(request.summary.clone()),
        }];

        if let Some(calls) = request.context.get("recent_api_calls") {
            if calls.as_array().is_some_and(|a| !a.is_empty()) {
                sections.push(DisplaySection {
                    title: "Recent Actions".to_string(),
                    kind: SectionKind::List,
                    body: calls.clone(),
                });
            }
        }

        if let Some(outputs) = request.context.get("intermediate_outputs") {
            if outputs.as_object().is_some_and(|o| !o.is_empty()) {
                sections.push(DisplaySection {
                    title: "Outputs".to_string(),
                    kind: SectionKind::Json,
                    body: outputs.clone(),
                });
            }
        }

        if let Some(monitoring) = request.context.get("monitoring") {
            if let Some(anomalies) = monitoring.get("anomalies") {
                if anomalies.as_array().is_some_and(|a| !a.is_empty()) {
                    sections.push(DisplaySection {
                        title: "Alerts".to_string(),
                        kind: SectionKind::Alerts,
                        body: anomalies.clone(),
                    });
                }
            }
            if let Some(recommendations) = monitoring.get("recommendations") {
                if recommendations.as_array().is_some_and(|a| !a.is_empty()) {
                    sections.push(DisplaySection {
                        title: "Recommendations".to_string(),
                        kind: SectionKind::List,
                        body: recommendations.clone(),
                    });
                }
            }
        }

        sections.push(DisplaySection {
            title: "Decision".to_string(),
            kind: SectionKind::Decision,
            body: serde_json::json!({
                "options": [
                    {"value": "approved", "label": "Approve - continue execution"},
                    {"value": "modified", "label": "Approve with modifications"},
                    {"value": "rejected", "label": "Reject - roll back"},
                ]
            }),
        });

        DisplayDocument {
            request_id: request.request_id,
            workflow_id: request.workflow_id.clone(),
            checkpoint_id: request.checkpoint_id.clone(),
            created_at: request.created_at,
            summary: request.summary.clone(),
            sections,
        }
    }

    /// Validate and record a human decision, producing the response to route
    /// back to the orchestrator. The request leaves the pending set.
    pub fn submit_decision(
        &self,
        request_id: Uuid,
        decision: ApprovalDecision,
        rationale: impl Into<String>,
        approved_by: impl Into<String>,
        modifications: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<ApprovalResponse, SupervisorError> {
        let now = self.clock.now();

        let mut pending = self.pending.lock().unwrap();
        let request = pending
            .get(&request_id)
            .ok_or(SupervisorError::UnknownRequest(request_id))?;

        let response = ApprovalResponse {
            request_id,
            decision,
            rationale: rationale.into(),
            modifications,
            approved_by: approved_by.into(),
            approved_at: now,
        };
        response.validate()?;

        let response_secs = (now - request.created_at).num_milliseconds() as f64 / 1000.0;
        pending.remove(&request_id);
        drop(pending);

        self.history.lock().unwrap().push(HistoryEntry {
            response: response.clone(),
            response_secs,
        });

        tracing::info!(
            request_id = %request_id,
            decision = ?decision,
            approved_by = response.approved_by.as_str(),
            "decision submitted"
        );

        Ok(response)
    }

    /// Track a request created elsewhere (e.g. by the orchestrator) so it
    /// shows up in this supervisor's pending set and stats.
    pub fn track(&self, request: ApprovalRequest) {
        self.pending
            .lock()
            .unwrap()
            .insert(request.request_id, request);
    }

    /// Pending requests in creation order.
    pub fn pending_requests(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<_> = self.pending.lock().unwrap().values().cloned().collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// All recorded decisions, oldest first.
    pub fn history(&self) -> Vec<ApprovalResponse> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.response.clone())
            .collect()
    }

    /// Lifetime decision statistics.
    pub fn stats(&self) -> SupervisorStats {
        let history = self.history.lock().unwrap();
        let pending = self.pending.lock().unwrap().len();

        let total = history.len();
        let count = |d: ApprovalDecision| history.iter().filter(|e| e.response.decision == d).count();
        let approved = count(ApprovalDecision::Approved);

        SupervisorStats {
            supervisor_id: self.supervisor_id.clone(),
            total,
            pending,
            approved,
            rejected: count(ApprovalDecision::Rejected),
            modified: count(ApprovalDecision::Modified),
            approval_rate: if total == 0 {
                0.0
            } else {
                approved as f64 / total as f64
            },
            average_response_secs: if total == 0 {
                0.0
            } else {
                history.iter().map(|e| e.response_secs).sum::<f64>() / total as f64
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Summary and context building
// ---------------------------------------------------------------------------

/// One-line human-readable summary of an execution state.
pub fn summarize_state(state: &ExecutionState, monitor_report: Option<&MonitorReport>) -> String {
    let mut parts = vec![format!(
        "Agent completed {} actions with {} decisions",
        state.api_calls.len(),
        state.decision_trace.len()
    )];

    if !state.intermediate_outputs.is_empty() {
        let keys: Vec<&str> = state
            .intermediate_outputs
            .keys()
            .map(String::as_str)
            .collect();
        parts.push(format!("Generated outputs: {}", keys.join(", ")));
    }

    if let Some(report) = monitor_report {
        if !report.anomalies.is_empty() {
            parts.push(format!("{} anomalies detected", report.anomalies.len()));
        }
    }

    if !state.resource_consumption.is_empty() {
        let api_calls = state
            .resource_consumption
            .get("api_calls")
            .copied()
            .unwrap_or(0.0);
        let tokens = state
            .resource_consumption
            .get("tokens_used")
            .copied()
            .unwrap_or(0.0);
        parts.push(format!("Resources: {api_calls} API calls, {tokens} tokens"));
    }

    parts.join(" | ")
}

/// Context digest for an approval decision: recent decisions and calls,
/// all outputs, resource totals, and any monitoring report.
pub fn digest_context(
    state: &ExecutionState,
    monitor_report: Option<&MonitorReport>,
) -> BTreeMap<String, serde_json::Value> {
    let mut context = BTreeMap::new();

    context.insert(
        "execution_summary".to_string(),
        serde_json::json!({
            "api_calls_count": state.api_calls.len(),
            "decisions_count": state.decision_trace.len(),
            "outputs_count": state.intermediate_outputs.len(),
            "timestamp": state.timestamp,
        }),
    );

    let recent_decisions: Vec<&str> = state
        .decision_trace
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(String::as_str)
        .collect();
    context.insert(
        "recent_decisions".to_string(),
        serde_json::json!(recent_decisions),
    );

    // Descriptions, side-effect flags, and timestamps only -- never payloads
    let recent_calls: Vec<serde_json::Value> = state
        .api_calls
        .iter()
        .rev()
        .take(5)
        .rev()
        .map(|c| {
            serde_json::json!({
                "description": c.description,
                "has_side_effects": c.has_side_effects,
                "timestamp": c.timestamp,
            })
        })
        .collect();
    context.insert(
        "recent_api_calls".to_string(),
        serde_json::Value::Array(recent_calls),
    );

    context.insert(
        "intermediate_outputs".to_string(),
        serde_json::json!(state.intermediate_outputs),
    );
    context.insert(
        "resource_consumption".to_string(),
        serde_json::json!(state.resource_consumption),
    );

    if let Some(report) = monitor_report {
        context.insert(
            "monitoring".to_string(),
            serde_json::json!({
                "anomalies": report.anomalies,
                "recommendations": report.recommendations,
                "should_checkpoint": report.should_checkpoint,
            }),
        );
    }

    context
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::monitor::Monitor;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use warden_types::config::MonitorThresholds;
    use warden_types::workflow::{ApiCallRecord, CheckpointConfig};

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(Utc::now()))
    }

    fn sample_state() -> ExecutionState {
        let mut state = ExecutionState::new("execute", Utc::now());
        for i in 0..7 {
            state.api_calls.push(ApiCallRecord {
                call_id: format!("call-{i}"),
                timestamp: Utc::now(),
                description: format!("api call {i}"),
                has_side_effects: i % 2 == 0,
                result: json!({"secret": "never shown"}),
            });
        }
        for i in 0..8 {
            state.decision_trace.push(format!("decision {i}"));
        }
        state.intermediate_outputs.insert("report".to_string(), json!("..."));
        state.intermediate_outputs.insert("summary".to_string(), json!("..."));
        state.resource_consumption.insert("api_calls".to_string(), 7.0);
        state.resource_consumption.insert("tokens_used".to_string(), 900.0);
        state
    }

    #[test]
    fn summary_has_documented_shape() {
        let clock = fixed_clock();
        let supervisor = Supervisor::new("supervisor-1", clock);
        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &sample_state(),
            None,
            None,
        );

        assert!(request
            .summary
            .starts_with("Agent completed 7 actions with 8 decisions"));
        assert!(request.summary.contains("Generated outputs: report, summary"));
        assert!(request.summary.contains("Resources: 7 API calls, 900 tokens"));
    }

    #[test]
    fn context_digest_truncates_to_last_five() {
        let supervisor = Supervisor::new("supervisor-1", fixed_clock());
        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &sample_state(),
            None,
            None,
        );

        let decisions = request.context["recent_decisions"].as_array().unwrap();
        assert_eq!(decisions.len(), 5);
        assert_eq!(decisions[0], "decision 3"); // oldest of the last five
        assert_eq!(decisions[4], "decision 7");

        let calls = request.context["recent_api_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[4]["description"], "api call 6");
    }

    #[test]
    fn context_never_leaks_call_payloads() {
        let supervisor = Supervisor::new("supervisor-1", fixed_clock());
        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &sample_state(),
            None,
            None,
        );

        let serialized = serde_json::to_string(&request.context).unwrap();
        assert!(!serialized.contains("never shown"));
    }

    #[test]
    fn monitoring_report_lands_in_context_and_display() {
        let clock = fixed_clock();
        let supervisor = Supervisor::new("supervisor-1", clock.clone());

        let monitor = Monitor::new(MonitorThresholds {
            max_api_calls: 3,
            max_tokens: 10_000.0,
        });
        let state = sample_state();
        let checkpoint = CheckpointConfig {
            checkpoint_id: "execute".to_string(),
            name: "Execute".to_string(),
            description: String::new(),
            requires_approval: true,
            timeout_seconds: 300,
            can_rollback: true,
        };
        let report = monitor.observe(&state, &checkpoint, clock.now());
        assert!(!report.anomalies.is_empty());

        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &state,
            Some(&report),
            None,
        );
        assert!(request.summary.contains("anomalies detected"));
        assert!(request.context.contains_key("monitoring"));

        let display = supervisor.format_for_display(&request);
        let titles: Vec<&str> = display.sections.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"Summary"));
        assert!(titles.contains(&"Recent Actions"));
        assert!(titles.contains(&"Outputs"));
        assert!(titles.contains(&"Alerts"));
        assert!(titles.contains(&"Recommendations"));
        assert_eq!(*titles.last().unwrap(), "Decision");
    }

    #[test]
    fn submit_decision_requires_pending_request() {
        let supervisor = Supervisor::new("supervisor-1", fixed_clock());
        let err = supervisor
            .submit_decision(
                Uuid::now_v7(),
                ApprovalDecision::Approved,
                "fine",
                "supervisor-1",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownRequest(_)));
    }

    #[test]
    fn submit_decision_moves_request_out_of_pending() {
        let supervisor = Supervisor::new("supervisor-1", fixed_clock());
        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &sample_state(),
            None,
            None,
        );
        assert_eq!(supervisor.pending_requests().len(), 1);

        let response = supervisor
            .submit_decision(
                request.request_id,
                ApprovalDecision::Approved,
                "looks good",
                "supervisor-1",
                None,
            )
            .unwrap();
        assert_eq!(response.decision, ApprovalDecision::Approved);
        assert!(supervisor.pending_requests().is_empty());
        assert_eq!(supervisor.history().len(), 1);

        // Same request cannot be decided twice
        let err = supervisor
            .submit_decision(
                request.request_id,
                ApprovalDecision::Rejected,
                "changed my mind",
                "supervisor-1",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SupervisorError::UnknownRequest(_)));
    }

    #[test]
    fn modified_decision_requires_modifications() {
        let supervisor = Supervisor::new("supervisor-1", fixed_clock());
        let request = supervisor.create_request(
            "wf-1",
            "execute",
            Uuid::now_v7(),
            &sample_state(),
            None,
            None,
        );

        let err = supervisor
            .submit_decision(
                request.request_id,
                ApprovalDecision::Modified,
                "tweak",
                "supervisor-1",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Validation(_)));

        // Failed validation keeps the request pending
        assert_eq!(supervisor.pending_requests().len(), 1);
    }

    #[test]
    fn stats_track_decisions_and_response_time() {
        let clock = fixed_clock();
        let supervisor = Supervisor::new("supervisor-1", clock.clone());
        let state = sample_state();

        let r1 = supervisor.create_request("wf-1", "a", Uuid::now_v7(), &state, None, None);
        let r2 = supervisor.create_request("wf-1", "b", Uuid::now_v7(), &state, None, None);
        let r3 = supervisor.create_request("wf-1", "c", Uuid::now_v7(), &state, None, None);

        clock.advance(Duration::seconds(10));
        supervisor
            .submit_decision(r1.request_id, ApprovalDecision::Approved, "ok", "sup", None)
            .unwrap();
        clock.advance(Duration::seconds(10));
        supervisor
            .submit_decision(r2.request_id, ApprovalDecision::Rejected, "unsafe", "sup", None)
            .unwrap();

        let stats = supervisor.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.approved, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.modified, 0);
        assert_eq!(stats.approval_rate, 0.5);
        assert_eq!(stats.average_response_secs, 15.0); // (10 + 20) / 2

        let _ = r3;
    }
}
