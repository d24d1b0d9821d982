//! Move outcomes and the run report

use crate::region::{RegionInfo, ServerName};
use std::fmt;
use std::time::Duration;

/// Result of a single region move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Region confirmed open on the destination
    Succeeded,
    /// Retry budget exhausted; carries the last failure reason
    Failed { reason: String },
    /// Dispatched, then left unconfirmed when its attempt timed out after cancellation
    Pending,
    /// Never dispatched because the run was cancelled first
    NotAttempted,
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveOutcome::Succeeded => f.write_str("succeeded"),
            MoveOutcome::Failed { reason } => write!(f, "failed: {}", reason),
            MoveOutcome::Pending => f.write_str("pending"),
            MoveOutcome::NotAttempted => f.write_str("not attempted"),
        }
    }
}

/// Per-move entry of a report
#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub region: RegionInfo,
    pub source: ServerName,
    pub destination: ServerName,
    pub outcome: MoveOutcome,
    /// Dispatch attempts made (0 when not attempted)
    pub attempts: u32,
    pub duration: Duration,
}

/// Aggregated outcome of one run
#[derive(Debug, Clone, Default)]
pub struct MoveReport {
    pub records: Vec<MoveRecord>,
    /// Total execution time
    pub duration: Duration,
    /// Set when placement was delegated to the master balancer
    pub balancer_moved: Option<bool>,
}

impl MoveReport {
    fn count(&self, pred: impl Fn(&MoveOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, MoveOutcome::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, MoveOutcome::Failed { .. }))
    }

    pub fn pending(&self) -> usize {
        self.count(|o| matches!(o, MoveOutcome::Pending))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|o| matches!(o, MoveOutcome::NotAttempted))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Records of moves that ended failed
    pub fn failures(&self) -> Vec<&MoveRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, MoveOutcome::Failed { .. }))
            .collect()
    }

    /// Success rate as percentage of attempted moves
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded() + self.failed();
        if total == 0 {
            100.0
        } else {
            (self.succeeded() as f64 / total as f64) * 100.0
        }
    }

    /// Summary string
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} succeeded, {} failed, {} pending, {} not attempted in {:?} ({:.1}% success rate)",
            self.succeeded(),
            self.failed(),
            self.pending(),
            self.not_attempted(),
            self.duration,
            self.success_rate()
        );
        if let Some(moved) = self.balancer_moved {
            summary.push_str(&format!(", balancer moved regions: {}", moved));
        }
        summary
    }

    /// One line per failed move: table, region, destination and last error
    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|r| {
                let reason = match &r.outcome {
                    MoveOutcome::Failed { reason } => reason.as_str(),
                    _ => "",
                };
                format!(
                    "table={} region={} from={} to={} attempts={} error={}",
                    r.region.table,
                    r.region.encoded_name,
                    r.source,
                    r.destination,
                    r.attempts,
                    reason
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
