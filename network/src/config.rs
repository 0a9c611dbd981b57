// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use roomlink_core::{EncryptionType, SecurityProfile};
use serde::{Deserialize, Serialize};

/// Smallest step the background driver will run at
pub const MIN_DRIVER_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Host liveness ping cadence
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Full session refresh cadence, every role
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Step of the background driving loop
    #[serde(with = "humantime_serde")]
    pub driver_period: Duration,
    pub encryption: EncryptionType,
    /// Create sessions hidden from quick-join
    pub private_sessions: bool,
    pub max_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            poll_interval: Duration::from_secs(65),
            driver_period: Duration::from_millis(100),
            encryption: EncryptionType::Dtls,
            private_sessions: false,
            max_capacity: 100,
        }
    }
}

impl CoordinatorConfig {
    pub fn security_profile(&self) -> SecurityProfile {
        self.encryption.into()
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.heartbeat_interval.is_zero(), "heartbeat_interval must be greater than zero");
        ensure!(!self.poll_interval.is_zero(), "poll_interval must be greater than zero");
        ensure!(
            self.driver_period >= MIN_DRIVER_PERIOD,
            "driver_period must be at least {:?}",
            MIN_DRIVER_PERIOD
        );
        ensure!(
            self.max_capacity >= 2,
            "max_capacity must be at least 2, got {}",
            self.max_capacity
        );
        Ok(())
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("io", "roomlink", "roomlink")
        .context("Failed to determine config directory")?;

    Ok(proj_dirs.config_dir().join("config.toml"))
}

/// Load the per-user config, writing the default file on first run
pub fn load_config() -> Result<CoordinatorConfig> {
    let config_path = get_config_path().context("Failed to determine config path")?;
    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &Path) -> Result<CoordinatorConfig> {
    if !config_path.exists() {
        tracing::info!("Config file not found, creating default at: {}", config_path.display());

        let default_config = CoordinatorConfig::default();
        save_config_to(&default_config, config_path)?;
        return Ok(default_config);
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let config = toml::from_str::<CoordinatorConfig>(&content)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", config_path.display()))?;
    Ok(config)
}

pub fn save_config(config: &CoordinatorConfig) -> Result<()> {
    let config_path = get_config_path().context("Failed to determine config path")?;
    save_config_to(config, &config_path)
}

pub fn save_config_to(config: &CoordinatorConfig, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let toml_content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(config_path, toml_content)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    tracing::info!("Saved config to: {}", config_path.display());
    Ok(())
}
