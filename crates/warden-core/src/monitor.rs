//! Execution monitor: anomaly detection, timeout evaluation, and checkpoint
//! forcing.
//!
//! The monitor is pure with respect to orchestrator state -- it never
//! mutates a workflow. It inspects an [`ExecutionState`] against the current
//! checkpoint config, raises anomalies, and decides whether a checkpoint
//! should be forced (custom trigger, anomaly, or timeout).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_types::config::MonitorThresholds;
use warden_types::workflow::{CheckpointConfig, ExecutionState};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Counts and sizes captured from one execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEntry {
    pub timestamp: DateTime<Utc>,
    pub api_calls: usize,
    pub decisions: usize,
    pub outputs: usize,
    pub resources: BTreeMap<String, f64>,
    /// Size of the serialized agent memory, in bytes.
    pub memory_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighApiVolume,
    HighTokenUsage,
    ErrorDetected,
}

/// One detected anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub details: String,
}

/// Why a checkpoint was forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    CustomCondition,
    AnomalyDetected,
    Timeout,
}

/// Result of one monitoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReport {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    /// True when any force reason fired.
    pub should_checkpoint: bool,
    pub trigger_reason: Option<TriggerReason>,
    pub telemetry: TelemetryEntry,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<String>,
}

/// Expected-progress baseline for [`Monitor::compare_progress`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExpectedProgress {
    pub api_calls: usize,
    pub outputs: usize,
}

/// Actual-vs-expected progress comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressComparison {
    pub timestamp: DateTime<Utc>,
    pub api_calls_expected: usize,
    pub api_calls_actual: usize,
    pub outputs_expected: usize,
    pub outputs_actual: usize,
    /// Within 20% call variance and at least 80% of expected outputs.
    pub on_track: bool,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

type TriggerFn = Box<dyn Fn(&ExecutionState) -> bool + Send + Sync>;

/// Watches execution states and decides when a checkpoint must be forced.
pub struct Monitor {
    thresholds: MonitorThresholds,
    triggers: Mutex<HashMap<String, TriggerFn>>,
    telemetry: Mutex<Vec<TelemetryEntry>>,
}

impl Monitor {
    pub fn new(thresholds: MonitorThresholds) -> Self {
        Self {
            thresholds,
            triggers: Mutex::new(HashMap::new()),
            telemetry: Mutex::new(Vec::new()),
        }
    }

    /// Register a predicate that forces a checkpoint when it returns true.
    /// Keyed by checkpoint id; at most one predicate per checkpoint.
    pub fn register_trigger<F>(&self, checkpoint_id: impl Into<String>, condition: F)
    where
        F: Fn(&ExecutionState) -> bool + Send + Sync + 'static,
    {
        self.triggers
            .lock()
            .unwrap()
            .insert(checkpoint_id.into(), Box::new(condition));
    }

    /// Evaluate one execution state against its checkpoint config.
    ///
    /// `now` is injected so timeout evaluation is deterministic in tests.
    pub fn observe(
        &self,
        state: &ExecutionState,
        checkpoint: &CheckpointConfig,
        now: DateTime<Utc>,
    ) -> MonitorReport {
        let telemetry = capture_telemetry(state, now);
        self.telemetry.lock().unwrap().push(telemetry.clone());

        let mut should_checkpoint = false;
        let mut trigger_reason = None;

        // Custom trigger first, then anomalies, then timeout; a later reason
        // overrides an earlier one so timeout always wins.
        {
            let triggers = self.triggers.lock().unwrap();
            if let Some(condition) = triggers.get(&checkpoint.checkpoint_id) {
                if condition(state) {
                    should_checkpoint = true;
                    trigger_reason = Some(TriggerReason::CustomCondition);
                }
            }
        }

        let anomalies = self.detect_anomalies(state);
        if !anomalies.is_empty() {
            should_checkpoint = true;
            trigger_reason = Some(TriggerReason::AnomalyDetected);
        }

        if self.timed_out(state, checkpoint, now) {
            should_checkpoint = true;
            trigger_reason = Some(TriggerReason::Timeout);
        }

        let recommendations = self.recommendations(state, &anomalies);

        tracing::debug!(
            checkpoint_id = checkpoint.checkpoint_id.as_str(),
            should_checkpoint,
            reason = ?trigger_reason,
            anomalies = anomalies.len(),
            "monitoring pass complete"
        );

        MonitorReport {
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            timestamp: now,
            should_checkpoint,
            trigger_reason,
            telemetry,
            anomalies,
            recommendations,
        }
    }

    fn detect_anomalies(&self, state: &ExecutionState) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        if state.api_calls.len() > self.thresholds.max_api_calls {
            anomalies.push(Anomaly {
                kind: AnomalyKind::HighApiVolume,
                severity: AnomalySeverity::Warning,
                details: format!("{} API calls made", state.api_calls.len()),
            });
        }

        let tokens_used = state
            .resource_consumption
            .get("tokens_used")
            .copied()
            .unwrap_or(0.0);
        if tokens_used > self.thresholds.max_tokens {
            anomalies.push(Anomaly {
                kind: AnomalyKind::HighTokenUsage,
                severity: AnomalySeverity::Warning,
                details: format!("{tokens_used} tokens consumed"),
            });
        }

        let error_decisions = state
            .decision_trace
            .iter()
            .filter(|d| {
                let lower = d.to_lowercase();
                lower.contains("error") || lower.contains("failed")
            })
            .count();
        if error_decisions > 0 {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ErrorDetected,
                severity: AnomalySeverity::Critical,
                details: format!("{error_decisions} error decisions found"),
            });
        }

        anomalies
    }

    fn timed_out(
        &self,
        state: &ExecutionState,
        checkpoint: &CheckpointConfig,
        now: DateTime<Utc>,
    ) -> bool {
        let elapsed = (now - state.timestamp).num_seconds();
        elapsed > checkpoint.timeout_seconds as i64
    }

    fn recommendations(&self, state: &ExecutionState, anomalies: &[Anomaly]) -> Vec<String> {
        let mut recommendations = Vec::new();

        if !anomalies.is_empty() {
            recommendations
                .push("Human review recommended due to detected anomalies".to_string());
        }
        if state.api_calls.len() > 30 {
            recommendations.push("Consider breaking task into smaller steps".to_string());
        }
        if state.intermediate_outputs.is_empty() {
            recommendations.push("No outputs generated yet, verify progress".to_string());
        }

        recommendations
    }

    /// Compare actual progress to an expected baseline.
    pub fn compare_progress(
        &self,
        actual: &ExecutionState,
        expected: ExpectedProgress,
        now: DateTime<Utc>,
    ) -> ProgressComparison {
        let api_calls_actual = actual.api_calls.len();
        let outputs_actual = actual.intermediate_outputs.len();

        let call_variance = api_calls_actual.abs_diff(expected.api_calls);
        let on_track = call_variance as f64 <= expected.api_calls as f64 * 0.2
            && outputs_actual as f64 >= expected.outputs as f64 * 0.8;

        ProgressComparison {
            timestamp: now,
            api_calls_expected: expected.api_calls,
            api_calls_actual,
            outputs_expected: expected.outputs,
            outputs_actual,
            on_track,
        }
    }

    /// Totals over all monitoring passes so far.
    pub fn telemetry_summary(&self) -> TelemetrySummary {
        let telemetry = self.telemetry.lock().unwrap();
        TelemetrySummary {
            entries: telemetry.len(),
            total_api_calls: telemetry.iter().map(|t| t.api_calls).sum(),
            total_decisions: telemetry.iter().map(|t| t.decisions).sum(),
            latest: telemetry.last().cloned(),
        }
    }
}

/// Aggregate over all telemetry entries a monitor has captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub entries: usize,
    pub total_api_calls: usize,
    pub total_decisions: usize,
    pub latest: Option<TelemetryEntry>,
}

fn capture_telemetry(state: &ExecutionState, now: DateTime<Utc>) -> TelemetryEntry {
    let memory_size = serde_json::to_vec(&state.agent_memory)
        .map(|b| b.len())
        .unwrap_or(0);
    TelemetryEntry {
        timestamp: now,
        api_calls: state.api_calls.len(),
        decisions: state.decision_trace.len(),
        outputs: state.intermediate_outputs.len(),
        resources: state.resource_consumption.clone(),
        memory_size,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use warden_types::workflow::ApiCallRecord;

    fn checkpoint(timeout_seconds: u64) -> CheckpointConfig {
        CheckpointConfig {
            checkpoint_id: "execute".to_string(),
            name: "Execute".to_string(),
            description: String::new(),
            requires_approval: true,
            timeout_seconds,
            can_rollback: true,
        }
    }

    fn state_with_calls(count: usize, now: DateTime<Utc>) -> ExecutionState {
        let mut state = ExecutionState::new("execute", now);
        for i in 0..count {
            state.api_calls.push(ApiCallRecord {
                call_id: format!("call-{i}"),
                timestamp: now,
                description: "call".to_string(),
                has_side_effects: false,
                result: json!(null),
            });
        }
        state
    }

    #[test]
    fn quiet_state_needs_no_checkpoint() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        let mut state = state_with_calls(3, now);
        state.intermediate_outputs.insert("draft".to_string(), json!("..."));

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(!report.should_checkpoint);
        assert!(report.trigger_reason.is_none());
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn high_api_volume_raises_warning() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        let state = state_with_calls(51, now);

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(report.should_checkpoint);
        assert_eq!(report.trigger_reason, Some(TriggerReason::AnomalyDetected));
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.kind, AnomalyKind::HighApiVolume);
        assert_eq!(anomaly.severity, AnomalySeverity::Warning);
    }

    #[test]
    fn token_usage_threshold_is_tunable() {
        let monitor = Monitor::new(MonitorThresholds {
            max_api_calls: 50,
            max_tokens: 500.0,
        });
        let now = Utc::now();
        let mut state = state_with_calls(1, now);
        state.resource_consumption.insert("tokens_used".to_string(), 800.0);

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(report
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::HighTokenUsage));
    }

    #[test]
    fn error_decisions_are_critical() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        let mut state = state_with_calls(1, now);
        state.decision_trace.push("Retried after ERROR in fetch".to_string());
        state.decision_trace.push("upload FAILED twice".to_string());

        let report = monitor.observe(&state, &checkpoint(300), now);
        let anomaly = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::ErrorDetected)
            .unwrap();
        assert_eq!(anomaly.severity, AnomalySeverity::Critical);
        assert!(anomaly.details.contains('2'));
    }

    #[test]
    fn timeout_forces_checkpoint_and_wins_reason() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let captured_at = Utc::now();
        let state = state_with_calls(51, captured_at); // also anomalous
        let now = captured_at + Duration::seconds(301);

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(report.should_checkpoint);
        assert_eq!(report.trigger_reason, Some(TriggerReason::Timeout));
    }

    #[test]
    fn custom_trigger_forces_checkpoint() {
        let monitor = Monitor::new(MonitorThresholds::default());
        monitor.register_trigger("execute", |state: &ExecutionState| {
            state.agent_memory.contains_key("panic")
        });

        let now = Utc::now();
        let mut state = state_with_calls(1, now);
        state.intermediate_outputs.insert("x".to_string(), json!(1));

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(!report.should_checkpoint);

        state.agent_memory.insert("panic".to_string(), json!(true));
        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(report.should_checkpoint);
        assert_eq!(report.trigger_reason, Some(TriggerReason::CustomCondition));
    }

    #[test]
    fn recommendations_reflect_state() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        let state = state_with_calls(31, now);

        let report = monitor.observe(&state, &checkpoint(300), now);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("smaller steps")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("No outputs")));
    }

    #[test]
    fn compare_progress_tracks_variance() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        let mut state = state_with_calls(10, now);
        for i in 0..4 {
            state.intermediate_outputs.insert(format!("out-{i}"), json!(1));
        }

        let cmp = monitor.compare_progress(
            &state,
            ExpectedProgress {
                api_calls: 10,
                outputs: 5,
            },
            now,
        );
        assert!(cmp.on_track); // 0 variance, 4/5 outputs = 80%

        let cmp = monitor.compare_progress(
            &state,
            ExpectedProgress {
                api_calls: 20,
                outputs: 5,
            },
            now,
        );
        assert!(!cmp.on_track); // call variance 10 > 20% of 20
    }

    #[test]
    fn telemetry_summary_accumulates() {
        let monitor = Monitor::new(MonitorThresholds::default());
        let now = Utc::now();
        monitor.observe(&state_with_calls(2, now), &checkpoint(300), now);
        monitor.observe(&state_with_calls(3, now), &checkpoint(300), now);

        let summary = monitor.telemetry_summary();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.total_api_calls, 5);
        assert_eq!(summary.latest.unwrap().api_calls, 3);
    }
}
