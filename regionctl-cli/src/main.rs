//! regionctl CLI
//!
//! Operator tool for balancing regions of selected tables across the live
//! region servers of a cluster.
//!
//! # Commands
//! - `balance` - Plan and apply region moves for a set of tables
//! - `tables` - Show which tables a pattern list selects
//! - `config` - Show or edit configuration
//!
//! # Configuration
//! Config file: ~/.regionctl/config.toml
//!
//! # Exit codes
//! 0 success, 2 configuration or planning error, 3 safety gate blocked,
//! 4 one or more moves failed, 5 cluster unavailable, 6 cancelled with moves
//! left unresolved, 130 forced exit on a second Ctrl-C

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod symbols;

use commands::balance::BalanceConfig;
use commands::config::ConfigAction;
use commands::tables::TablesConfig;
use config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "regionctl")]
#[command(about = "Region balancing for master-coordinated clusters")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.regionctl/config.toml)
    #[arg(long, global = true, env = "REGIONCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance the regions of the matching tables
    Balance {
        /// Cluster endpoint: admin gateway URL, host[:port], or file:// topology
        endpoint: String,

        /// Comma-separated table name patterns (regular expressions)
        tables: String,

        /// Strategy: default (master balancer), rr (round-robin) or st (factor-weighted)
        strategy: String,

        /// Apply the plan even if it moves more regions than the safety threshold
        #[arg(long)]
        force_proceed: bool,

        /// Balance factor for the st strategy: uniform, heap, ss or rq
        #[arg(long)]
        factor: Option<String>,

        /// Dispatch moves concurrently and collect the results afterwards
        #[arg(long)]
        move_async: bool,

        /// Compute and check the plan without applying it
        #[arg(long)]
        test: bool,

        /// Script run with the alert message when the run fails
        #[arg(long, value_name = "SCRIPT")]
        after_failure: Option<PathBuf>,

        /// Safety threshold as a fraction of the considered regions
        #[arg(long)]
        max_move_ratio: Option<f64>,

        /// Per-move timeout in seconds
        #[arg(long)]
        move_timeout: Option<u64>,

        /// Retries per move after the first failed attempt
        #[arg(long)]
        max_retries: Option<u32>,

        /// Cap on concurrent moves with --move-async
        #[arg(long)]
        max_in_flight: Option<usize>,
    },

    /// Show the tables a pattern list resolves to
    Tables {
        /// Cluster endpoint
        endpoint: String,

        /// Comma-separated table name patterns
        tables: String,

        /// Show region counts per server
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., safety.max_move_ratio, executor.max_retries)
        key: String,
        /// Value to set
        value: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let code = match cli.command {
        Commands::Balance {
            endpoint,
            tables,
            strategy,
            force_proceed,
            factor,
            move_async,
            test,
            after_failure,
            max_move_ratio,
            move_timeout,
            max_retries,
            max_in_flight,
        } => {
            let settings = match config::load_config(cli.config.as_deref()) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    return ExitCode::from(regionctl_balancer::exit_code::CONFIGURATION);
                }
            };
            let config = BalanceConfig {
                endpoint,
                patterns: tables,
                strategy,
                factor,
                force_proceed,
                move_async,
                test,
                after_failure,
                overrides: ConfigOverrides {
                    max_move_ratio,
                    move_timeout_secs: move_timeout,
                    max_retries,
                    max_in_flight,
                },
            };
            commands::balance(&settings, config).await
        }

        Commands::Tables {
            endpoint,
            tables,
            verbose,
        } => {
            commands::tables(TablesConfig {
                endpoint,
                patterns: tables,
                verbose,
            })
            .await
        }

        Commands::Config { command } => {
            let action = match command {
                None | Some(ConfigCommands::Show) => ConfigAction::Show,
                Some(ConfigCommands::Path) => ConfigAction::Path,
                Some(ConfigCommands::Init { force }) => ConfigAction::Init { force },
                Some(ConfigCommands::Set { key, value }) => ConfigAction::Set { key, value },
            };
            match commands::config::run(action, cli.config.as_deref()) {
                Ok(()) => regionctl_balancer::exit_code::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {:#}", e);
                    regionctl_balancer::exit_code::CONFIGURATION
                }
            }
        }
    };

    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_balance_arguments() {
        let cli = Cli::try_parse_from([
            "regionctl",
            "balance",
            "file:///tmp/cluster.json",
            "t1,t2",
            "st",
            "--factor=ss",
            "--force-proceed",
            "--move-async",
            "--after-failure=/usr/local/bin/page",
        ])
        .unwrap();

        let Commands::Balance {
            tables,
            factor,
            force_proceed,
            move_async,
            test,
            after_failure,
            ..
        } = cli.command
        else {
            panic!("expected balance");
        };
        assert_eq!(tables, "t1,t2");
        assert_eq!(factor.as_deref(), Some("ss"));
        assert!(force_proceed && move_async && !test);
        assert_eq!(after_failure, Some(PathBuf::from("/usr/local/bin/page")));
    }

    #[test]
    fn test_balance_requires_strategy() {
        assert!(Cli::try_parse_from(["regionctl", "balance", "host:16010", "t1"]).is_err());
    }
}
