//! Agent driver port and the scripted driver used by demos and tests.
//!
//! The real executor collaborator drives an LLM to produce plan/step
//! outputs; the core only ever sees the [`ExecutionState`] fields it yields.
//! [`ScriptedDriver`] plays back a pre-authored plan instead, accumulating
//! memory, call history, decisions, and resource consumption across
//! checkpoints exactly like a live run would.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use warden_types::workflow::{ApiCallRecord, ExecutionState};

/// One scripted unit of work within a checkpoint.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    /// What the "API call" did.
    pub description: String,
    /// Whether the call would need a compensating inverse.
    pub has_side_effects: bool,
    /// Decision-trace line to append.
    pub decision: String,
    /// Output key and value produced, if any.
    pub output: Option<(String, serde_json::Value)>,
    /// Tokens this step "consumed".
    pub tokens: f64,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no script registered for checkpoint '{0}'")]
    UnknownCheckpoint(String),
}

/// Produces execution states on the executor's behalf.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait AgentDriver: Send + Sync {
    /// Run the work for one checkpoint, building on the previous state.
    fn run_checkpoint(
        &self,
        checkpoint_id: &str,
        previous: Option<&ExecutionState>,
    ) -> impl std::future::Future<Output = Result<ExecutionState, DriverError>> + Send;
}

/// Plays back pre-authored steps per checkpoint.
pub struct ScriptedDriver {
    script: HashMap<String, Vec<ScriptedStep>>,
    call_counter: Mutex<usize>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            script: HashMap::new(),
            call_counter: Mutex::new(0),
        }
    }

    /// Register the steps to play back at a checkpoint.
    pub fn script_checkpoint(
        mut self,
        checkpoint_id: impl Into<String>,
        steps: Vec<ScriptedStep>,
    ) -> Self {
        self.script.insert(checkpoint_id.into(), steps);
        self
    }
}

impl Default for ScriptedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentDriver for ScriptedDriver {
    async fn run_checkpoint(
        &self,
        checkpoint_id: &str,
        previous: Option<&ExecutionState>,
    ) -> Result<ExecutionState, DriverError> {
        let steps = self
            .script
            .get(checkpoint_id)
            .ok_or_else(|| DriverError::UnknownCheckpoint(checkpoint_id.to_string()))?;

        // Carry everything forward from the previous checkpoint
        let mut state = match previous {
            Some(prev) => {
                let mut state = prev.clone();
                state.checkpoint_id = checkpoint_id.to_string();
                state.timestamp = Utc::now();
                state
            }
            None => ExecutionState::new(checkpoint_id, Utc::now()),
        };

        for step in steps {
            let mut counter = self.call_counter.lock().unwrap();
            *counter += 1;
            let call_id = format!("call-{:04}-{}", *counter, Uuid::now_v7().simple());
            drop(counter);

            state.api_calls.push(ApiCallRecord {
                call_id,
                timestamp: Utc::now(),
                description: step.description.clone(),
                has_side_effects: step.has_side_effects,
                result: serde_json::json!({"status": "ok"}),
            });
            state.decision_trace.push(step.decision.clone());
            if let Some((key, value)) = &step.output {
                state
                    .intermediate_outputs
                    .insert(key.clone(), value.clone());
            }

            *state
                .resource_consumption
                .entry("tokens_used".to_string())
                .or_insert(0.0) += step.tokens;
            *state
                .resource_consumption
                .entry("api_calls".to_string())
                .or_insert(0.0) += 1.0;
        }

        state
            .agent_memory
            .insert("last_checkpoint".to_string(), serde_json::json!(checkpoint_id));

        tracing::debug!(
            checkpoint_id,
            api_calls = state.api_calls.len(),
            decisions = state.decision_trace.len(),
            "scripted checkpoint executed"
        );

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(description: &str, side_effects: bool, output: Option<(&str, serde_json::Value)>) -> ScriptedStep {
        ScriptedStep {
            description: description.to_string(),
            has_side_effects: side_effects,
            decision: format!("decided to {description}"),
            output: output.map(|(k, v)| (k.to_string(), v)),
            tokens: 100.0,
        }
    }

    #[tokio::test]
    async fn first_checkpoint_starts_fresh() {
        let driver = ScriptedDriver::new().script_checkpoint(
            "plan",
            vec![
                step("survey sources", false, None),
                step("draft outline", false, Some(("outline", json!(["a", "b"])))),
            ],
        );

        let state = driver.run_checkpoint("plan", None).await.unwrap();
        assert_eq!(state.checkpoint_id, "plan");
        assert_eq!(state.api_calls.len(), 2);
        assert_eq!(state.decision_trace.len(), 2);
        assert_eq!(state.intermediate_outputs["outline"], json!(["a", "b"]));
        assert_eq!(state.resource_consumption["tokens_used"], 200.0);
        assert_eq!(state.agent_memory["last_checkpoint"], json!("plan"));
    }

    #[tokio::test]
    async fn later_checkpoints_accumulate() {
        let driver = ScriptedDriver::new()
            .script_checkpoint("plan", vec![step("survey", false, None)])
            .script_checkpoint("execute", vec![step("publish", true, None)]);

        let first = driver.run_checkpoint("plan", None).await.unwrap();
        let second = driver.run_checkpoint("execute", Some(&first)).await.unwrap();

        assert_eq!(second.checkpoint_id, "execute");
        assert_eq!(second.api_calls.len(), 2);
        assert_eq!(second.side_effect_call_ids().len(), 1);
        assert_eq!(second.resource_consumption["api_calls"], 2.0);
    }

    #[tokio::test]
    async fn unknown_checkpoint_errors() {
        let driver = ScriptedDriver::new();
        let err = driver.run_checkpoint("ghost", None).await.unwrap_err();
        assert!(matches!(err, DriverError::UnknownCheckpoint(_)));
    }

    #[tokio::test]
    async fn call_ids_are_unique() {
        let driver = ScriptedDriver::new().script_checkpoint(
            "plan",
            vec![step("a", false, None), step("b", false, None)],
        );
        let state = driver.run_checkpoint("plan", None).await.unwrap();
        assert_ne!(state.api_calls[0].call_id, state.api_calls[1].call_id);
    }
}
