//! Safety gate
//!
//! Runs after planning and before any dispatch. A placement that would move
//! more than the configured fraction of the considered regions is refused
//! unless the operator passed `--force-proceed`.

use regionctl_core::TableName;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

use crate::planner::Placement;

/// Refusal issued by the gate
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "Plan would move {:.1}% of {} regions (threshold {:.1}%) across tables [{}]; \
     re-run with --force-proceed to apply it",
    .fraction * 100.0,
    .regions,
    .threshold * 100.0,
    table_list(.tables)
)]
pub struct GateBlocked {
    pub fraction: f64,
    pub threshold: f64,
    pub regions: usize,
    pub tables: BTreeSet<TableName>,
}

fn table_list(tables: &BTreeSet<TableName>) -> String {
    tables
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the gate let a placement through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Within the threshold
    Clear,
    /// Over the threshold, operator override given
    Overridden,
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    threshold: f64,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

impl SafetyGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Check an estimated move fraction
    pub fn evaluate(
        &self,
        fraction: f64,
        regions: usize,
        tables: &BTreeSet<TableName>,
        force: bool,
    ) -> Result<GateDecision, GateBlocked> {
        if fraction <= self.threshold {
            info!(fraction, threshold = self.threshold, "Safety gate clear");
            return Ok(GateDecision::Clear);
        }
        if force {
            warn!(
                fraction,
                threshold = self.threshold,
                "Safety gate overridden by --force-proceed"
            );
            return Ok(GateDecision::Overridden);
        }
        Err(GateBlocked {
            fraction,
            threshold: self.threshold,
            regions,
            tables: tables.clone(),
        })
    }

    /// Check a strategy's placement
    ///
    /// Explicit plans are sized by the moves they contain; delegated runs
    /// count as moving everything.
    pub fn check(
        &self,
        placement: &Placement,
        tables: &BTreeSet<TableName>,
        force: bool,
    ) -> Result<GateDecision, GateBlocked> {
        self.evaluate(
            placement.estimated_fraction(),
            placement.regions_considered(),
            tables,
            force,
        )
    }
}
