//! Configuration management
//!
//! Handles loading and saving the CLI configuration.
//! Config directory: ~/.regionctl/ (cross-platform)
//!
//! Config file format (~/.regionctl/config.toml):
//! ```toml
//! [executor]
//! move_timeout_secs = 120
//! max_retries = 3
//! retry_delay_ms = 1000
//! max_retry_delay_ms = 30000
//! poll_interval_ms = 250
//! max_in_flight = 0
//!
//! [safety]
//! max_move_ratio = 0.3
//!
//! [alert]
//! after_failure = "/usr/local/bin/page-oncall"
//! script_timeout_secs = 30
//! ```
//!
//! Keys missing from the file fall back to `REGIONCTL_*` environment
//! variables, then to built-in defaults. Command-line flags override all of
//! them.

use anyhow::{Context, Result};
use regionctl_balancer::{BalancerConfig, ConfigError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Structure of ~/.regionctl/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegionCtlConfig {
    /// Move execution settings
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Safety gate settings
    #[serde(default)]
    pub safety: SafetySettings,

    /// Failure alerting
    #[serde(default)]
    pub alert: AlertSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub move_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// Cap on concurrent moves with --move-async (0 = unbounded)
    pub max_in_flight: usize,
}

impl From<&BalancerConfig> for ExecutorSettings {
    fn from(config: &BalancerConfig) -> Self {
        Self {
            move_timeout_secs: config.move_timeout_secs,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            max_retry_delay_ms: config.max_retry_delay_ms,
            poll_interval_ms: config.poll_interval_ms,
            max_in_flight: config.max_in_flight,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&env_defaults())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    /// Largest fraction of the considered regions a plan may move without
    /// --force-proceed
    pub max_move_ratio: f64,
}

impl From<&BalancerConfig> for SafetySettings {
    fn from(config: &BalancerConfig) -> Self {
        Self {
            max_move_ratio: config.max_move_ratio,
        }
    }
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self::from(&env_defaults())
    }
}

/// `REGIONCTL_*` environment over the built-in balancer defaults
fn env_defaults() -> BalancerConfig {
    BalancerConfig::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring REGIONCTL_* environment settings");
        BalancerConfig::default()
    })
}

const DEFAULT_ALERT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Script run with the alert message when a balance run fails
    pub after_failure: Option<PathBuf>,
    pub script_timeout_secs: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            after_failure: std::env::var("REGIONCTL_AFTER_FAILURE")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            script_timeout_secs: std::env::var("REGIONCTL_ALERT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ALERT_TIMEOUT_SECS),
        }
    }
}

/// Per-invocation overrides from command-line flags
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_move_ratio: Option<f64>,
    pub move_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_in_flight: Option<usize>,
}

impl RegionCtlConfig {
    /// Built-in defaults, ignoring the environment
    pub fn builtin() -> Self {
        let defaults = BalancerConfig::default();
        Self {
            executor: ExecutorSettings::from(&defaults),
            safety: SafetySettings::from(&defaults),
            alert: AlertSettings {
                after_failure: None,
                script_timeout_secs: DEFAULT_ALERT_TIMEOUT_SECS,
            },
        }
    }

    /// Balancer configuration with flag overrides applied, validated
    pub fn balancer_config(
        &self,
        overrides: &ConfigOverrides,
    ) -> std::result::Result<BalancerConfig, ConfigError> {
        let config = BalancerConfig {
            max_move_ratio: overrides
                .max_move_ratio
                .unwrap_or(self.safety.max_move_ratio),
            move_timeout_secs: overrides
                .move_timeout_secs
                .unwrap_or(self.executor.move_timeout_secs),
            max_retries: overrides.max_retries.unwrap_or(self.executor.max_retries),
            retry_delay_ms: self.executor.retry_delay_ms,
            max_retry_delay_ms: self.executor.max_retry_delay_ms,
            poll_interval_ms: self.executor.poll_interval_ms,
            max_in_flight: overrides
                .max_in_flight
                .unwrap_or(self.executor.max_in_flight),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Get the config directory path (~/.regionctl/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".regionctl"))
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from `path`
pub fn load_config_from(path: &Path) -> Result<RegionCtlConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Load configuration, from `path` when given or from the default location
/// Falls back to defaults if the default file doesn't exist or is unreadable
pub fn load_config(path: Option<&Path>) -> Result<RegionCtlConfig> {
    if let Some(path) = path {
        return load_config_from(path);
    }

    match config_file_path() {
        Ok(path) if path.exists() => match load_config_from(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Ignoring config file");
                Ok(RegionCtlConfig::default())
            }
        },
        _ => Ok(RegionCtlConfig::default()),
    }
}

/// Save configuration to `path`, creating its directory if needed
pub fn save_config_to(config: &RegionCtlConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(path, content).context("Failed to write config file")?;
    Ok(())
}
