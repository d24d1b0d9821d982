//! Balance Command
//!
//! Runs one balance invocation against a cluster and renders the plan or
//! the move report.

use crate::config::{ConfigOverrides, RegionCtlConfig};
use crate::symbols;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use regionctl_balancer::command::unsuccessful;
use regionctl_balancer::{
    exit_code, BalanceCommand, BalanceError, BalanceOptions, BalanceOutcome, ClusterAdmin,
    ClusterEndpoint, LogAlertSink, MemoryCluster, MoveMode, Placement, ProgressStatus,
    ProgressUpdate, ScriptAlertSink,
};
use regionctl_core::{MovePlan, MoveReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status after a forced second interrupt (128 + SIGINT)
const INTERRUPTED: i32 = 130;

/// Balance configuration
pub struct BalanceConfig {
    pub endpoint: String,
    pub patterns: String,
    pub strategy: String,
    pub factor: Option<String>,
    pub force_proceed: bool,
    pub move_async: bool,
    pub test: bool,
    pub after_failure: Option<PathBuf>,
    pub overrides: ConfigOverrides,
}

impl BalanceConfig {
    fn options(&self) -> BalanceOptions {
        BalanceOptions {
            factor: self.factor.clone(),
            force_proceed: self.force_proceed,
            move_mode: if self.move_async {
                MoveMode::Async
            } else {
                MoveMode::Sync
            },
            dry_run: self.test,
            ..BalanceOptions::new(self.patterns.clone(), self.strategy.clone())
        }
    }
}

/// Cluster handle, plus the topology file to write back for sandboxes
struct Target {
    admin: Arc<dyn ClusterAdmin>,
    sandbox: Option<(Arc<MemoryCluster>, PathBuf)>,
}

fn open_target(endpoint: &ClusterEndpoint) -> Result<Target, u8> {
    match endpoint {
        ClusterEndpoint::Sandbox(path) => match MemoryCluster::load(path) {
            Ok(cluster) => {
                let cluster = Arc::new(cluster);
                Ok(Target {
                    admin: cluster.clone(),
                    sandbox: Some((cluster, path.clone())),
                })
            }
            Err(e) => Err(fail(&e.to_string(), exit_code::CLUSTER_UNAVAILABLE)),
        },
        ClusterEndpoint::Http(_) => match endpoint.connect() {
            Ok(admin) => Ok(Target {
                admin,
                sandbox: None,
            }),
            Err(e) => Err(fail(&e.to_string(), exit_code::CLUSTER_UNAVAILABLE)),
        },
    }
}

/// Run balance command, returning the process exit code
pub async fn run(settings: &RegionCtlConfig, config: BalanceConfig) -> u8 {
    let balancer_config = match settings.balancer_config(&config.overrides) {
        Ok(c) => c,
        Err(e) => return fail(&e.to_string(), exit_code::CONFIGURATION),
    };
    let endpoint = match ClusterEndpoint::parse(&config.endpoint) {
        Ok(endpoint) => endpoint,
        Err(e) => return fail(&e.to_string(), exit_code::CONFIGURATION),
    };
    let target = match open_target(&endpoint) {
        Ok(target) => target,
        Err(code) => return code,
    };

    let options = config.options();
    print_header(&endpoint, &options);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut command = BalanceCommand::new(target.admin.clone(), balancer_config)
        .with_alert(Arc::new(LogAlertSink))
        .with_cancellation(cancel);
    if let Some(script) = config
        .after_failure
        .clone()
        .or_else(|| settings.alert.after_failure.clone())
    {
        let sink = ScriptAlertSink::new(script)
            .with_timeout(Duration::from_secs(settings.alert.script_timeout_secs));
        command = command.with_alert(Arc::new(sink));
    }

    let (tx, rx) = mpsc::channel(100);
    let renderer = spawn_progress(rx);
    command = command.with_progress(tx);

    let result = command.run(&options).await;
    drop(command);
    if let Err(e) = renderer.await {
        warn!(error = %e, "Progress renderer stopped");
    }

    // Only runs that reached the cluster change the sandbox
    let mutated = matches!(
        &result,
        Ok(BalanceOutcome::Applied(_) | BalanceOutcome::Delegated(_))
            | Err(BalanceError::MovesFailed { .. } | BalanceError::Cancelled { .. })
    );

    let code = match result {
        Ok(BalanceOutcome::DryRun(placement)) => {
            print_placement(&placement);
            println!(
                "\n{} Dry run: nothing was applied",
                style(symbols::INFO).cyan()
            );
            exit_code::SUCCESS
        }
        Ok(BalanceOutcome::Applied(report)) => {
            print_report(&report);
            exit_code::SUCCESS
        }
        Ok(BalanceOutcome::Delegated(report)) => {
            println!(
                "{} Master balancer ran ({})",
                style(symbols::CHECK).green(),
                match report.balancer_moved {
                    Some(true) => "regions were moved",
                    _ => "nothing to move",
                }
            );
            exit_code::SUCCESS
        }
        Err(e) => render_error(&e),
    };

    if let (true, Some((cluster, path))) = (mutated, &target.sandbox) {
        match cluster.save(path) {
            Ok(()) => info!(path = %path.display(), "Sandbox topology saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save sandbox topology"),
        }
    }
    code
}

fn print_header(endpoint: &ClusterEndpoint, options: &BalanceOptions) {
    println!("{}", style("Region Balance").bold().underlined());
    println!();
    println!("  Cluster:   {}", style(endpoint).cyan());
    println!("  Tables:    {}", style(&options.table_patterns).cyan());
    println!("  Strategy:  {}", style(&options.strategy).cyan());
    if let Some(factor) = &options.factor {
        println!("  Factor:    {}", style(factor).cyan());
    }
    println!(
        "  Mode:      {}",
        style(match options.move_mode {
            MoveMode::Sync => "sync",
            MoveMode::Async => "async",
        })
        .cyan()
    );
    println!();
}

/// Cancel the run on Ctrl-C; a second Ctrl-C exits without waiting
fn spawn_interrupt_handler(cancel: CancellationToken) {
    let (tx, rx) = mpsc::channel(2);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    tokio::spawn(async move {
        if watch_interrupts(rx, cancel).await {
            std::process::exit(INTERRUPTED);
        }
    });
}

/// Cancel on the first interrupt. Returns true once a second one arrives.
async fn watch_interrupts(mut interrupts: mpsc::Receiver<()>, cancel: CancellationToken) -> bool {
    if interrupts.recv().await.is_none() {
        return false;
    }
    warn!("Interrupted, no further moves will be dispatched");
    cancel.cancel();
    eprintln!(
        "{} Waiting for moves already sent to the cluster; press Ctrl-C again to exit now",
        style(symbols::WARN).yellow()
    );

    if interrupts.recv().await.is_none() {
        return false;
    }
    warn!("Interrupted again, exiting with moves possibly in flight");
    true
}

/// Render executor progress until the sender is dropped
fn spawn_progress(mut rx: mpsc::Receiver<ProgressUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new(0);
        if let Ok(bar) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(bar.progress_chars("#>-"));
        }

        while let Some(update) = rx.recv().await {
            match &update.status {
                ProgressStatus::Dispatched if update.attempt == 1 => pb.inc_length(1),
                ProgressStatus::Dispatched => {}
                ProgressStatus::Retrying(retry) => pb.println(format!(
                    "{} {} retry {} {} {}",
                    style(symbols::WARN).yellow(),
                    update.region,
                    retry,
                    symbols::ARROW,
                    update.destination
                )),
                ProgressStatus::Completed => pb.inc(1),
                ProgressStatus::Unconfirmed => {
                    pb.inc(1);
                    pb.println(format!(
                        "{} {} {} {} unconfirmed",
                        style(symbols::WARN).yellow(),
                        update.region,
                        symbols::ARROW,
                        update.destination
                    ));
                }
                ProgressStatus::Failed(reason) => {
                    pb.inc(1);
                    pb.println(format!(
                        "{} {} {} {}: {}",
                        style(symbols::CROSS).red(),
                        update.region,
                        symbols::ARROW,
                        update.destination,
                        reason
                    ));
                }
            }
            pb.set_message(format!("{} {}", update.table, update.region));
        }
        pb.finish_and_clear();
    })
}

fn print_placement(placement: &Placement) {
    println!("{}", style("Plan").bold());
    println!("{}", symbols::HLINE);
    match placement {
        Placement::Moves(plan) => print_moves(plan),
        Placement::Delegate { tables, .. } => {
            for table in tables {
                println!("  {} master balancer over {}", symbols::INFO, table);
            }
        }
    }
    println!("{}", symbols::HLINE);
    println!("{}", placement.summary());
}

fn print_moves(plan: &MovePlan) {
    if plan.is_empty() {
        println!("  {}", style("Already balanced, no moves needed").green());
        return;
    }
    for mv in plan.moves() {
        println!(
            "  {:<24} {}  {} {} {}",
            mv.region.table.to_string(),
            mv.region.encoded_name,
            mv.source,
            symbols::ARROW,
            style(&mv.destination).cyan()
        );
    }
}

fn print_report(report: &MoveReport) {
    if report.records.is_empty() {
        println!(
            "{} {}",
            style(symbols::CHECK).green(),
            style("Already balanced, no moves needed").green()
        );
        return;
    }

    let symbol = if report.has_failures() {
        style(symbols::CROSS).red()
    } else {
        style(symbols::CHECK).green()
    };
    println!("{} {}", symbol, report.summary());

    for record in unsuccessful(report) {
        println!(
            "  {} {} {} {} ({}, {} attempts)",
            style(symbols::WARN).yellow(),
            record.region,
            symbols::ARROW,
            record.destination,
            record.outcome,
            record.attempts
        );
    }
}

fn render_error(error: &BalanceError) -> u8 {
    match error {
        BalanceError::MovesFailed { report, .. } => {
            print_report(report);
            fail(&error.to_string(), error.exit_code())
        }
        BalanceError::Cancelled { report, .. } => {
            print_report(report);
            println!("{} {}", style(symbols::WARN).yellow(), error);
            error.exit_code()
        }
        BalanceError::Blocked(_) => {
            println!("{} {}", style(symbols::WARN).yellow(), error);
            error.exit_code()
        }
        BalanceError::NoTablesMatched(_) => {
            println!("{} {}", style(symbols::WARN).yellow(), error);
            error.exit_code()
        }
        _ => fail(&error.to_string(), error.exit_code()),
    }
}

fn fail(message: &str, code: u8) -> u8 {
    eprintln!("{} {}", style(symbols::CROSS).red(), style(message).red());
    code
}
