//! Process-level configuration for Warden.
//!
//! All the policy knobs the orchestration core consults -- completion
//! targets, settlement fee, monitor thresholds, default approval timeout --
//! live here so deployments can tune them in `warden.toml` instead of
//! patching constants.

use serde::{Deserialize, Serialize};

use crate::escrow::SettlementPolicy;

/// Targets used to estimate partial completion from an execution state.
///
/// Each contributor is `min(observed / target, 1)`; the ratio is the mean of
/// the non-empty contributors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionPolicy {
    #[serde(default = "default_api_calls_target")]
    pub api_calls_target: u64,
    #[serde(default = "default_outputs_target")]
    pub outputs_target: u64,
    #[serde(default = "default_decisions_target")]
    pub decisions_target: u64,
}

fn default_api_calls_target() -> u64 {
    10
}

fn default_outputs_target() -> u64 {
    5
}

fn default_decisions_target() -> u64 {
    10
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            api_calls_target: default_api_calls_target(),
            outputs_target: default_outputs_target(),
            decisions_target: default_decisions_target(),
        }
    }
}

/// Anomaly-detection thresholds for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    /// API-call count above which a warning anomaly is raised.
    #[serde(default = "default_max_api_calls")]
    pub max_api_calls: usize,
    /// `tokens_used` consumption above which a warning anomaly is raised.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: f64,
}

fn default_max_api_calls() -> usize {
    50
}

fn default_max_tokens() -> f64 {
    10_000.0
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_api_calls: default_max_api_calls(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Top-level process configuration, loaded from `warden.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Address the REST API binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory for the filesystem artifact store. Defaults to
    /// `<data_dir>/artifacts` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<std::path::PathBuf>,
    /// Remote escrow facility base URL. Unset means the in-process ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_api_url: Option<String>,
    /// Default approval window for checkpoints that don't set one.
    #[serde(default = "default_checkpoint_timeout")]
    pub default_timeout_seconds: u64,
    #[serde(default)]
    pub completion: CompletionPolicy,
    #[serde(default)]
    pub monitor: MonitorThresholds,
    #[serde(default)]
    pub settlement: SettlementPolicy,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_checkpoint_timeout() -> u64 {
    300
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            artifact_dir: None,
            escrow_api_url: None,
            default_timeout_seconds: default_checkpoint_timeout(),
            completion: CompletionPolicy::default(),
            monitor: MonitorThresholds::default(),
            settlement: SettlementPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = WardenConfig::default();
        assert_eq!(config.completion.api_calls_target, 10);
        assert_eq!(config.completion.outputs_target, 5);
        assert_eq!(config.completion.decisions_target, 10);
        assert_eq!(config.monitor.max_api_calls, 50);
        assert_eq!(config.monitor.max_tokens, 10_000.0);
        assert_eq!(config.settlement.supervisor_fee, 0.10);
        assert_eq!(config.default_timeout_seconds, 300);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
listen_addr = "0.0.0.0:9090"

[monitor]
max_api_calls = 20
"#;
        let config: WardenConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9090");
        assert_eq!(config.monitor.max_api_calls, 20);
        // Untouched sections keep their defaults
        assert_eq!(config.monitor.max_tokens, 10_000.0);
        assert_eq!(config.completion.outputs_target, 5);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config: WardenConfig = toml::from_str("").unwrap();
        assert_eq!(config, WardenConfig::default());
    }
}
