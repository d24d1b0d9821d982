//! Balancer configuration
//!
//! Tunables for the safety gate and the move executor. Defaults can be
//! overridden through `REGIONCTL_*` environment variables; the CLI layers its
//! config file and flags on top and passes the result in explicitly.

use crate::executor::ExecutorConfig;
use crate::gate::SafetyGate;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
///
/// Everything here is operator-correctable and is reported before the
/// cluster is read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Unknown balance strategy '{0}' (expected default, rr or st)")]
    UnknownStrategy(String),

    #[error("Unknown balance factor '{0}' (expected one of: {1})")]
    UnknownFactor(String, String),

    #[error("Strategy '{0}' requires --factor")]
    MissingFactor(String),

    #[error("Unsupported cluster endpoint '{0}': {1}")]
    UnsupportedEndpoint(String, String),
}

/// Balancer configuration
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// Largest fraction of regions a plan may move without --force-proceed
    pub max_move_ratio: f64,

    /// Per-move timeout in seconds (dispatch + confirmation)
    pub move_timeout_secs: u64,

    /// Retries after the first failed attempt of a move
    pub max_retries: u32,

    /// Initial backoff between attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_retry_delay_ms: u64,

    /// Interval between region location polls in milliseconds
    pub poll_interval_ms: u64,

    /// Cap on concurrently dispatched moves in async mode (0 = unbounded)
    pub max_in_flight: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_move_ratio: 0.3,
            move_timeout_secs: 120,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            poll_interval_ms: 250,
            max_in_flight: 0,
        }
    }
}

impl BalancerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_move_ratio = std::env::var("REGIONCTL_MAX_MOVE_RATIO")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_move_ratio);

        let move_timeout_secs = std::env::var("REGIONCTL_MOVE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.move_timeout_secs);

        let max_retries = std::env::var("REGIONCTL_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_delay_ms = std::env::var("REGIONCTL_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.retry_delay_ms);

        let max_retry_delay_ms = std::env::var("REGIONCTL_MAX_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_retry_delay_ms);

        let poll_interval_ms = std::env::var("REGIONCTL_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.poll_interval_ms);

        let max_in_flight = std::env::var("REGIONCTL_MAX_IN_FLIGHT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_in_flight);

        let config = Self {
            max_move_ratio,
            move_timeout_secs,
            max_retries,
            retry_delay_ms,
            max_retry_delay_ms,
            poll_interval_ms,
            max_in_flight,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the executor and gate cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_move_ratio > 0.0 && self.max_move_ratio <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "max_move_ratio".to_string(),
                format!("{} (must be in (0, 1])", self.max_move_ratio),
            ));
        }
        if self.move_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "move_timeout_secs".to_string(),
                "0 (a per-move timeout is mandatory)".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_ms".to_string(),
                "0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get move timeout as Duration
    pub fn move_timeout(&self) -> Duration {
        Duration::from_secs(self.move_timeout_secs)
    }

    /// Executor settings derived from this configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            move_timeout: self.move_timeout(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_in_flight: (self.max_in_flight > 0).then_some(self.max_in_flight),
        }
    }

    /// Safety gate for this configuration
    pub fn safety_gate(&self) -> SafetyGate {
        SafetyGate::new(self.max_move_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BalancerConfig::default();
        assert_eq!(config.max_move_ratio, 0.3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_in_flight, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_executor_config_mapping() {
        let config = BalancerConfig {
            move_timeout_secs: 30,
            max_in_flight: 8,
            ..Default::default()
        };
        let exec = config.executor_config();
        assert_eq!(exec.move_timeout, Duration::from_secs(30));
        assert_eq!(exec.max_in_flight, Some(8));
        assert_eq!(BalancerConfig::default().executor_config().max_in_flight, None);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = BalancerConfig {
            max_move_ratio: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(field, _)) if field == "max_move_ratio"
        ));
    }

    #[test]
    fn test_validate_requires_timeout() {
        let config = BalancerConfig {
            move_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("REGIONCTL_MOVE_TIMEOUT", "45");
        std::env::set_var("REGIONCTL_MAX_MOVE_RATIO", "0.5");
        let config = BalancerConfig::from_env();

        std::env::set_var("REGIONCTL_MAX_MOVE_RATIO", "2");
        let invalid = BalancerConfig::from_env();
        std::env::remove_var("REGIONCTL_MOVE_TIMEOUT");
        std::env::remove_var("REGIONCTL_MAX_MOVE_RATIO");

        let config = config.unwrap();
        assert_eq!(config.move_timeout_secs, 45);
        assert_eq!(config.max_move_ratio, 0.5);
        assert_eq!(config.max_retries, 3);
        assert!(invalid.is_err());
    }
}
