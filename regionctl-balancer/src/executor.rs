//! Move Executor
//!
//! Applies a [`MovePlan`] against the cluster with:
//! - Sync mode: one move at a time, each confirmed before the next
//! - Async mode: concurrent dispatch in a task group, then a collect phase
//! - Per-move timeout and bounded retry with exponential backoff
//! - Progress reporting and cooperative cancellation
//!
//! A move is confirmed when `region_location` reports the destination. Every
//! planned move ends up in the report exactly once.
//!
//! Cancellation stops new dispatch and further retries. A move already sent
//! to the cluster is still followed until it confirms or its attempt times
//! out; only then is it reported `Pending`.

use regionctl_core::{MoveOutcome, MovePlan, MoveRecord, MoveReport, RegionMove};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{ClusterAdmin, ClusterError};

/// Executor errors
#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    #[error("Move request failed: {0}")]
    Dispatch(ClusterError),

    #[error("Region not open on destination after {0:?}")]
    Timeout(Duration),

    #[error("Location check failed: {0}")]
    Confirmation(ClusterError),
}

impl ExecutorError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::Dispatch(e) | ExecutorError::Confirmation(e) => e.is_retryable(),
            ExecutorError::Timeout(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// How moves are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    /// Sequential, each move confirmed before the next
    #[default]
    Sync,
    /// All moves in flight at once, outcomes collected afterwards
    Async,
}

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for one attempt (dispatch plus confirmation)
    pub move_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled on every further retry
    pub retry_delay: Duration,
    /// Upper bound for the retry delay
    pub max_retry_delay: Duration,
    /// Interval between location polls
    pub poll_interval: Duration,
    /// Cap on concurrently running moves in async mode
    pub max_in_flight: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            move_timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            max_in_flight: None,
        }
    }
}

impl ExecutorConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// Progress update for a move
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub region: String,
    pub table: String,
    pub destination: String,
    pub attempt: u32,
    pub status: ProgressStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    Dispatched,
    Retrying(u32),
    Completed,
    Failed(String),
    /// Cancelled before the cluster confirmed the move
    Unconfirmed,
}

/// Runs single moves; cheap to clone into spawned tasks
#[derive(Clone)]
struct MoveWorker {
    admin: Arc<dyn ClusterAdmin>,
    config: ExecutorConfig,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
    cancel: CancellationToken,
}

impl MoveWorker {
    async fn report_progress(&self, mv: &RegionMove, attempt: u32, status: ProgressStatus) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx
                .send(ProgressUpdate {
                    region: mv.region.encoded_name.clone(),
                    table: mv.region.table.to_string(),
                    destination: mv.destination.to_string(),
                    attempt,
                    status,
                })
                .await;
        }
    }

    /// Request the move, then poll until the region opens on the destination
    async fn move_and_confirm(&self, mv: &RegionMove) -> Result<()> {
        self.admin
            .move_region(&mv.region, &mv.destination)
            .await
            .map_err(ExecutorError::Dispatch)?;

        loop {
            match self.admin.region_location(&mv.region).await {
                Ok(Some(server)) if server == mv.destination => return Ok(()),
                Ok(location) => {
                    debug!(region = %mv.region, ?location, "Region not yet on destination");
                }
                Err(e) if e.is_retryable() => {
                    debug!(region = %mv.region, error = %e, "Location poll failed");
                }
                Err(e) => return Err(ExecutorError::Confirmation(e)),
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Execute a single move with retries
    async fn run(&self, mv: RegionMove) -> MoveRecord {
        let start = Instant::now();
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                if self.cancel.is_cancelled() {
                    info!(region = %mv.region, "Cancelled, not retrying");
                    break;
                }
                self.report_progress(&mv, attempt + 1, ProgressStatus::Retrying(attempt))
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(self.config.backoff(attempt)) => {}
                    _ = self.cancel.cancelled() => {
                        info!(region = %mv.region, "Cancelled, not retrying");
                        break;
                    }
                }
            }
            attempts = attempt + 1;
            self.report_progress(&mv, attempts, ProgressStatus::Dispatched)
                .await;

            let error = match timeout(self.config.move_timeout, self.move_and_confirm(&mv)).await {
                Ok(Ok(())) => {
                    last_error = None;
                    break;
                }
                Ok(Err(e)) => e,
                Err(_) => ExecutorError::Timeout(self.config.move_timeout),
            };

            warn!(
                region = %mv.region,
                destination = %mv.destination,
                attempt = attempts,
                error = %error,
                "Move attempt failed"
            );
            let retryable = error.is_retryable();
            last_error = Some(error);
            if !retryable {
                break;
            }
        }

        let outcome = match last_error {
            None => {
                self.report_progress(&mv, attempts, ProgressStatus::Completed)
                    .await;
                MoveOutcome::Succeeded
            }
            // Sent but never confirmed, and no retry will follow
            Some(ExecutorError::Timeout(_)) if self.cancel.is_cancelled() => {
                warn!(region = %mv.region, destination = %mv.destination, "Move unconfirmed at cancellation");
                self.report_progress(&mv, attempts, ProgressStatus::Unconfirmed)
                    .await;
                MoveOutcome::Pending
            }
            Some(e) => {
                let reason = e.to_string();
                self.report_progress(&mv, attempts, ProgressStatus::Failed(reason.clone()))
                    .await;
                MoveOutcome::Failed { reason }
            }
        };

        MoveRecord {
            region: mv.region,
            source: mv.source,
            destination: mv.destination,
            outcome,
            attempts,
            duration: start.elapsed(),
        }
    }
}

fn unfinished(mv: RegionMove, outcome: MoveOutcome, attempts: u32) -> MoveRecord {
    MoveRecord {
        region: mv.region,
        source: mv.source,
        destination: mv.destination,
        outcome,
        attempts,
        duration: Duration::ZERO,
    }
}

/// Move executor
pub struct MoveExecutor {
    worker: MoveWorker,
}

impl MoveExecutor {
    /// Create a new executor
    pub fn new(admin: Arc<dyn ClusterAdmin>, config: ExecutorConfig) -> Self {
        Self {
            worker: MoveWorker {
                admin,
                config,
                progress_tx: None,
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Create executor with progress channel
    pub fn with_progress(
        admin: Arc<dyn ClusterAdmin>,
        config: ExecutorConfig,
    ) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(100);
        let executor = Self::new(admin, config).progress_to(tx);
        (executor, rx)
    }

    /// Send progress to an existing channel
    pub fn progress_to(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.worker.progress_tx = Some(tx);
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.worker.cancel = cancel;
        self
    }

    /// Token that stops further dispatch and retries when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.worker.cancel.clone()
    }

    /// Execute a move plan
    #[instrument(skip(self, plan), fields(moves = plan.len()))]
    pub async fn execute(&self, plan: MovePlan, mode: MoveMode) -> MoveReport {
        let start = Instant::now();

        if plan.is_empty() {
            info!("No moves to execute");
            return MoveReport::default();
        }

        info!(moves = plan.len(), ?mode, "Executing move plan");
        let mut report = match mode {
            MoveMode::Sync => self.execute_sync(plan).await,
            MoveMode::Async => self.execute_async(plan).await,
        };
        report.duration = start.elapsed();

        info!(summary = %report.summary(), "Move plan execution complete");
        report
    }

    async fn execute_sync(&self, plan: MovePlan) -> MoveReport {
        let mut report = MoveReport::default();
        let mut moves = plan.into_iter();

        while let Some(mv) = moves.next() {
            if self.worker.cancel.is_cancelled() {
                warn!("Cancelled, remaining moves not attempted");
                report.records.push(unfinished(mv, MoveOutcome::NotAttempted, 0));
                report
                    .records
                    .extend(moves.by_ref().map(|m| unfinished(m, MoveOutcome::NotAttempted, 0)));
                break;
            }
            report.records.push(self.worker.run(mv).await);
        }

        report
    }

    async fn execute_async(&self, plan: MovePlan) -> MoveReport {
        let mut report = MoveReport::default();
        let semaphore = self
            .worker
            .config
            .max_in_flight
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<String, RegionMove> = HashMap::new();
        let mut moves = plan.into_iter();

        // Dispatch
        while let Some(mv) = moves.next() {
            let permit = match &semaphore {
                None => None,
                Some(sem) => tokio::select! {
                    biased;
                    _ = self.worker.cancel.cancelled() => None,
                    permit = sem.clone().acquire_owned() => permit.ok(),
                },
            };
            if self.worker.cancel.is_cancelled() || (semaphore.is_some() && permit.is_none()) {
                warn!("Cancelled during dispatch, remaining moves not attempted");
                report.records.push(unfinished(mv, MoveOutcome::NotAttempted, 0));
                report
                    .records
                    .extend(moves.by_ref().map(|m| unfinished(m, MoveOutcome::NotAttempted, 0)));
                break;
            }

            in_flight.insert(mv.region.encoded_name.clone(), mv.clone());
            let worker = self.worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.run(mv).await
            });
        }

        // Collect: dispatched moves are followed to their outcome even after
        // cancellation
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(record) => {
                    in_flight.remove(&record.region.encoded_name);
                    report.records.push(record);
                }
                Err(e) => {
                    error!(error = %e, "Move task panicked");
                }
            }
        }

        // Moves whose tasks never reported back
        for (_, mv) in in_flight {
            report.records.push(unfinished(
                mv,
                MoveOutcome::Failed {
                    reason: "move task panicked".to_string(),
                },
                1,
            ));
        }

        report
    }
}
