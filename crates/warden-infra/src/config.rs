//! Configuration loader for Warden.
//!
//! Reads `warden.toml` from the data directory and deserializes it into
//! [`WardenConfig`]. Falls back to the documented defaults when the file is
//! missing or malformed.

use std::path::Path;

use warden_types::config::WardenConfig;

/// Load configuration from `{data_dir}/warden.toml`.
///
/// - If the file does not exist, returns [`WardenConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config (absent sections keep defaults).
pub async fn load_config(data_dir: &Path) -> WardenConfig {
    let config_path = data_dir.join("warden.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No warden.toml found at {}, using defaults", config_path.display());
            return WardenConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return WardenConfig::default();
        }
    };

    match toml::from_str::<WardenConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            WardenConfig::default()
        }
    }
}
