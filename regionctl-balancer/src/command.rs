//! Balance command
//!
//! Wires the pipeline together: strategy selection, table resolution,
//! snapshot, planning, safety gate, execution and alerting. Everything that
//! can be rejected without the cluster is rejected before it is contacted,
//! and nothing is dispatched before the gate has passed.

use regionctl_core::{ErrorCategory, MoveOutcome, MoveRecord, MoveReport, TableName};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertSink};
use crate::cluster::{ClusterAdmin, ClusterError};
use crate::config::{BalancerConfig, ConfigError};
use crate::executor::{MoveExecutor, MoveMode, ProgressUpdate};
use crate::gate::GateBlocked;
use crate::planner::{build_strategy, PlanError, Placement, StrategyKind};
use crate::resolver::{ResolveError, TableSetResolver};
use crate::snapshot::ClusterSnapshot;

/// Process exit codes
pub mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const CONFIGURATION: u8 = 2;
    pub const GATE_BLOCKED: u8 = 3;
    pub const MOVES_FAILED: u8 = 4;
    pub const CLUSTER_UNAVAILABLE: u8 = 5;
    pub const CANCELLED: u8 = 6;
}

#[derive(Error, Debug)]
pub enum BalanceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(ResolveError),

    #[error("No tables matched '{0}'")]
    NoTablesMatched(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Blocked(#[from] GateBlocked),

    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(#[source] ClusterError),

    #[error("{failed} of {total} region moves failed")]
    MovesFailed {
        failed: usize,
        total: usize,
        report: MoveReport,
    },

    #[error("Run cancelled: {unresolved} of {total} region moves left unresolved")]
    Cancelled {
        unresolved: usize,
        total: usize,
        report: MoveReport,
    },
}

impl From<ResolveError> for BalanceError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Cluster(e) => BalanceError::ClusterUnavailable(e),
            other => BalanceError::Resolve(other),
        }
    }
}

impl BalanceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BalanceError::Config(_)
            | BalanceError::Resolve(_)
            | BalanceError::NoTablesMatched(_) => ErrorCategory::Configuration,
            BalanceError::Plan(PlanError::InvalidPlan(_)) => ErrorCategory::Internal,
            BalanceError::Plan(_) => ErrorCategory::Planning,
            BalanceError::Blocked(_) => ErrorCategory::SafetyGate,
            BalanceError::ClusterUnavailable(_) | BalanceError::MovesFailed { .. } => {
                ErrorCategory::Cluster
            }
            BalanceError::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            BalanceError::Config(_)
            | BalanceError::Resolve(_)
            | BalanceError::NoTablesMatched(_)
            | BalanceError::Plan(_) => exit_code::CONFIGURATION,
            BalanceError::Blocked(_) => exit_code::GATE_BLOCKED,
            BalanceError::MovesFailed { .. } => exit_code::MOVES_FAILED,
            BalanceError::ClusterUnavailable(_) => exit_code::CLUSTER_UNAVAILABLE,
            BalanceError::Cancelled { .. } => exit_code::CANCELLED,
        }
    }

    /// Report of the run when moves were attempted
    pub fn report(&self) -> Option<&MoveReport> {
        match self {
            BalanceError::MovesFailed { report, .. } | BalanceError::Cancelled { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct BalanceOptions {
    /// Comma-separated table patterns
    pub table_patterns: String,
    /// Strategy name as typed
    pub strategy: String,
    pub factor: Option<String>,
    pub force_proceed: bool,
    pub move_mode: MoveMode,
    /// Plan and gate only
    pub dry_run: bool,
}

impl BalanceOptions {
    pub fn new(table_patterns: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            table_patterns: table_patterns.into(),
            strategy: strategy.into(),
            factor: None,
            force_proceed: false,
            move_mode: MoveMode::Sync,
            dry_run: false,
        }
    }
}

/// Successful run
#[derive(Debug, Clone)]
pub enum BalanceOutcome {
    /// Explicit moves applied
    Applied(MoveReport),
    /// Master balancer ran over the tables
    Delegated(MoveReport),
    /// Dry run: what would have been done
    DryRun(Placement),
}

pub struct BalanceCommand {
    admin: Arc<dyn ClusterAdmin>,
    config: BalancerConfig,
    alerts: Vec<Arc<dyn AlertSink>>,
    cancel: CancellationToken,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl BalanceCommand {
    pub fn new(admin: Arc<dyn ClusterAdmin>, config: BalancerConfig) -> Self {
        Self {
            admin,
            config,
            alerts: Vec::new(),
            cancel: CancellationToken::new(),
            progress_tx: None,
        }
    }

    pub fn with_alert(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts.push(sink);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Run one balance invocation
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, strategy = %options.strategy, patterns = %options.table_patterns))]
    pub async fn run(&self, options: &BalanceOptions) -> Result<BalanceOutcome, BalanceError> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let result = self.run_inner(options).await;
        if let Err(e) = &result {
            if e.category().is_alertable() {
                self.raise_alert(run_id, e).await;
            }
        }
        result
    }

    async fn run_inner(&self, options: &BalanceOptions) -> Result<BalanceOutcome, BalanceError> {
        let kind = StrategyKind::parse(&options.strategy)?;
        let strategy = build_strategy(kind, options.factor.as_deref())?;
        let resolver = TableSetResolver::parse(&options.table_patterns)?;

        let tables = resolver.resolve_from(self.admin.as_ref()).await?;
        if tables.is_empty() {
            warn!(patterns = %options.table_patterns, "No tables matched");
            return Err(BalanceError::NoTablesMatched(options.table_patterns.clone()));
        }
        info!(tables = %join_tables(&tables), "Resolved table set");

        let snapshot = ClusterSnapshot::capture(self.admin.as_ref(), &tables)
            .await
            .map_err(BalanceError::ClusterUnavailable)?;

        let placement = strategy.plan(&snapshot, &tables)?;

        let decision = self
            .config
            .safety_gate()
            .check(&placement, &tables, options.force_proceed)?;
        info!(?decision, "Safety gate passed");

        if options.dry_run {
            info!(plan = %placement.summary(), "Dry run, nothing applied");
            return Ok(BalanceOutcome::DryRun(placement));
        }

        match placement {
            Placement::Moves(plan) => {
                let total = plan.len();
                let mut executor = MoveExecutor::new(self.admin.clone(), self.config.executor_config())
                    .with_cancellation(self.cancel.clone());
                if let Some(tx) = &self.progress_tx {
                    executor = executor.progress_to(tx.clone());
                }

                let report = executor.execute(plan, options.move_mode).await;
                if report.has_failures() {
                    return Err(BalanceError::MovesFailed {
                        failed: report.failed(),
                        total,
                        report,
                    });
                }
                let unresolved = report.pending() + report.not_attempted();
                if unresolved > 0 {
                    warn!(unresolved, total, "Run cancelled before every move was resolved");
                    return Err(BalanceError::Cancelled {
                        unresolved,
                        total,
                        report,
                    });
                }
                Ok(BalanceOutcome::Applied(report))
            }
            Placement::Delegate { tables, .. } => self.delegate(&tables).await,
        }
    }

    /// Run the master balancer over `tables`
    async fn delegate(&self, tables: &BTreeSet<TableName>) -> Result<BalanceOutcome, BalanceError> {
        let start = Instant::now();
        let moved = self
            .admin
            .balancer_run(tables)
            .await
            .map_err(BalanceError::ClusterUnavailable)?;
        info!(moved, "Master balancer run finished");

        Ok(BalanceOutcome::Delegated(MoveReport {
            records: Vec::new(),
            duration: start.elapsed(),
            balancer_moved: Some(moved),
        }))
    }

    async fn raise_alert(&self, run_id: Uuid, error: &BalanceError) {
        let body = match error.report() {
            Some(report) => report.failure_summary(),
            None => String::new(),
        };
        let alert = Alert::new(run_id, error.to_string(), body);
        for sink in &self.alerts {
            if let Err(e) = sink.send(&alert).await {
                warn!(error = %e, "Alert delivery failed");
            }
        }
    }
}

fn join_tables(tables: &BTreeSet<TableName>) -> String {
    tables
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Records of a report that did not succeed, for display
pub fn unsuccessful(report: &MoveReport) -> impl Iterator<Item = &MoveRecord> {
    report
        .records
        .iter()
        .filter(|r| !matches!(r.outcome, MoveOutcome::Succeeded))
}
