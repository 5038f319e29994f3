use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{error, info};
use trestle_bot_core::config::TrestleBotConfig;

/// Reads a `.trestlebot/config.yml` file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<TrestleBotConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let config: TrestleBotConfig = serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    config.trace_loaded();
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the default config.
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<TrestleBotConfig> {
    if path.as_ref().is_file() {
        load_config(path)
    } else {
        info!(config_path = ?path.as_ref(), "No config file, using defaults");
        Ok(TrestleBotConfig::default())
    }
}

pub fn write_config<P: AsRef<Path>>(path: P, config: &TrestleBotConfig) -> Result<()> {
    let path_ref = path.as_ref();
    if let Some(parent) = path_ref.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    let content = serde_yaml::to_string(config).context("Failed to serialize config")?;
    fs::write(path_ref, content)
        .with_context(|| format!("Failed to write config file {}", path_ref.display()))?;
    info!(config_path = ?path_ref, "Config written");
    Ok(())
}
