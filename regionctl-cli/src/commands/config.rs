//! Config Command
//!
//! Shows, initializes or edits the config file.

use crate::config::{self, RegionCtlConfig};
use crate::symbols;
use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

pub enum ConfigAction {
    Show,
    Path,
    Init { force: bool },
    Set { key: String, value: String },
}

/// Run config command against `path` (default location when `None`)
pub fn run(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config::config_file_path()?,
    };

    match action {
        ConfigAction::Show => {
            let cfg = load_or_default(&path)?;
            show(&cfg);
            println!("{} {}", style("Config file:").dim(), path.display());
            if !path.exists() {
                println!(
                    "{} Run '{}' to create it",
                    style("(not created yet)").yellow(),
                    style("regionctl config init").green()
                );
            }
        }

        ConfigAction::Path => {
            println!("{}", path.display());
        }

        ConfigAction::Init { force } => {
            if path.exists() && !force {
                println!(
                    "{} Config file already exists at {}",
                    style(symbols::WARN).yellow(),
                    path.display()
                );
                println!("Use --force to overwrite");
                return Ok(());
            }

            config::save_config_to(&RegionCtlConfig::builtin(), &path)?;
            println!(
                "{} Config file created at {}",
                style(symbols::CHECK).green(),
                path.display()
            );
        }

        ConfigAction::Set { key, value } => {
            let mut cfg = load_or_default(&path)?;
            set(&mut cfg, &key, &value)?;
            cfg.balancer_config(&Default::default())
                .with_context(|| format!("Refusing to write {} = {}", key, value))?;
            config::save_config_to(&cfg, &path)?;
            println!("{} Configuration updated", style(symbols::CHECK).green());
        }
    }

    Ok(())
}

fn load_or_default(path: &Path) -> Result<RegionCtlConfig> {
    if path.exists() {
        config::load_config_from(path)
    } else {
        Ok(RegionCtlConfig::default())
    }
}

fn show(cfg: &RegionCtlConfig) {
    println!();
    println!("{}", style("regionctl Configuration").bold().underlined());
    println!();
    println!("{}", style("[executor]").cyan());
    println!("  move_timeout_secs = {}", cfg.executor.move_timeout_secs);
    println!("  max_retries = {}", cfg.executor.max_retries);
    println!("  retry_delay_ms = {}", cfg.executor.retry_delay_ms);
    println!("  max_retry_delay_ms = {}", cfg.executor.max_retry_delay_ms);
    println!("  poll_interval_ms = {}", cfg.executor.poll_interval_ms);
    println!("  max_in_flight = {}", cfg.executor.max_in_flight);
    println!();
    println!("{}", style("[safety]").cyan());
    println!("  max_move_ratio = {}", cfg.safety.max_move_ratio);
    println!();
    println!("{}", style("[alert]").cyan());
    match &cfg.alert.after_failure {
        Some(script) => println!("  after_failure = \"{}\"", script.display()),
        None => println!("  after_failure = {}", style("(none)").dim()),
    }
    println!("  script_timeout_secs = {}", cfg.alert.script_timeout_secs);
    println!();
}

const VALID_KEYS: &str = "executor.move_timeout_secs, executor.max_retries, \
executor.retry_delay_ms, executor.max_retry_delay_ms, executor.poll_interval_ms, \
executor.max_in_flight, safety.max_move_ratio, alert.after_failure, alert.script_timeout_secs";

fn set(cfg: &mut RegionCtlConfig, key: &str, value: &str) -> Result<()> {
    let invalid = || format!("Invalid value for {}: {}", key, value);
    match key {
        "executor.move_timeout_secs" => {
            cfg.executor.move_timeout_secs = value.parse().with_context(invalid)?
        }
        "executor.max_retries" => cfg.executor.max_retries = value.parse().with_context(invalid)?,
        "executor.retry_delay_ms" => {
            cfg.executor.retry_delay_ms = value.parse().with_context(invalid)?
        }
        "executor.max_retry_delay_ms" => {
            cfg.executor.max_retry_delay_ms = value.parse().with_context(invalid)?
        }
        "executor.poll_interval_ms" => {
            cfg.executor.poll_interval_ms = value.parse().with_context(invalid)?
        }
        "executor.max_in_flight" => {
            cfg.executor.max_in_flight = value.parse().with_context(invalid)?
        }
        "safety.max_move_ratio" => {
            cfg.safety.max_move_ratio = value.parse().with_context(invalid)?
        }
        "alert.after_failure" => {
            cfg.alert.after_failure = (!value.is_empty()).then(|| PathBuf::from(value))
        }
        "alert.script_timeout_secs" => {
            cfg.alert.script_timeout_secs = value.parse().with_context(invalid)?
        }
        _ => anyhow::bail!("Unknown config key: {}. Valid keys: {}", key, VALID_KEYS),
    }
    Ok(())
}
