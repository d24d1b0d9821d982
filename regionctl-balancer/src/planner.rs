//! Balance Planner
//!
//! Strategy engine mapping a [`ClusterSnapshot`] and a table set to a
//! placement decision. Owned strategies produce an explicit [`MovePlan`];
//! the delegate strategy hands the decision to the master balancer.
//!
//! Planning is pure: same snapshot and table set, same plan.

use regionctl_core::{MovePlan, RegionCtlError, TableName};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ConfigError;
use crate::factor::BalanceFactor;
use crate::round_robin::RoundRobinStrategy;
use crate::snapshot::ClusterSnapshot;
use crate::weighted::FactorWeightedStrategy;

/// Planner errors
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Resolved table set is empty")]
    EmptyTableSet,

    #[error("Server roster is empty")]
    EmptyRoster,

    #[error("Snapshot inconsistent with table set: {0}")]
    InconsistentSnapshot(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] RegionCtlError),
}

pub type Result<T> = std::result::Result<T, PlanError>;

/// Strategy selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Delegate to the master balancer
    Default,
    RoundRobin,
    FactorWeighted,
}

impl StrategyKind {
    /// Parse a strategy name (case-insensitive)
    pub fn parse(name: &str) -> std::result::Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(StrategyKind::Default),
            "rr" | "round-robin" => Ok(StrategyKind::RoundRobin),
            "st" | "stochastic" | "factor-weighted" | "fw" => Ok(StrategyKind::FactorWeighted),
            _ => Err(ConfigError::UnknownStrategy(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Default => "default",
            StrategyKind::RoundRobin => "rr",
            StrategyKind::FactorWeighted => "st",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a strategy decided
#[derive(Debug, Clone)]
pub enum Placement {
    /// Explicit moves computed here
    Moves(MovePlan),
    /// The master balancer decides, constrained to `tables`
    Delegate {
        tables: BTreeSet<TableName>,
        regions_considered: usize,
    },
}

impl Placement {
    /// Number of regions the decision covers
    pub fn regions_considered(&self) -> usize {
        match self {
            Placement::Moves(plan) => plan.regions_considered(),
            Placement::Delegate {
                regions_considered, ..
            } => *regions_considered,
        }
    }

    /// Estimated fraction of regions that will move
    ///
    /// A delegated run cannot be sized ahead of time and counts as 1.0.
    pub fn estimated_fraction(&self) -> f64 {
        match self {
            Placement::Moves(plan) => plan.move_fraction(),
            Placement::Delegate { .. } => 1.0,
        }
    }

    /// Tables the decision touches
    pub fn tables(&self) -> BTreeSet<TableName> {
        match self {
            Placement::Moves(plan) => plan.tables(),
            Placement::Delegate { tables, .. } => tables.clone(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Placement::Moves(plan) => plan.summary(),
            Placement::Delegate {
                tables,
                regions_considered,
            } => format!(
                "delegated to master balancer: {} tables, {} regions",
                tables.len(),
                regions_considered
            ),
        }
    }
}

/// A balancing strategy
pub trait BalanceStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Decide placement for `tables`; called after [`validate`] passed
    fn place(&self, snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<Placement>;

    /// Validate inputs and plan
    #[instrument(skip_all, fields(strategy = %self.kind(), tables = tables.len()))]
    fn plan(&self, snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<Placement> {
        validate(snapshot, tables)?;
        let placement = self.place(snapshot, tables)?;
        info!(plan = %placement.summary(), "Planned placement");
        Ok(placement)
    }
}

/// Checks shared by every strategy
pub fn validate(snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<()> {
    if tables.is_empty() {
        return Err(PlanError::EmptyTableSet);
    }
    if snapshot.roster().is_empty() {
        return Err(PlanError::EmptyRoster);
    }
    if let Some(missing) = tables.iter().find(|t| !snapshot.tables().contains(*t)) {
        return Err(PlanError::InconsistentSnapshot(format!(
            "table {} was not captured",
            missing
        )));
    }
    if let Some(region) = snapshot
        .assignments()
        .keys()
        .find(|r| !snapshot.tables().contains(&r.table))
    {
        return Err(PlanError::InconsistentSnapshot(format!(
            "region {} belongs to table {} outside the table set",
            region.encoded_name, region.table
        )));
    }
    Ok(())
}

/// Hands the whole decision to the master balancer
#[derive(Debug, Clone, Default)]
pub struct DelegateStrategy;

impl BalanceStrategy for DelegateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Default
    }

    fn place(&self, snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<Placement> {
        debug!("Delegating placement to the master balancer");
        Ok(Placement::Delegate {
            tables: tables.clone(),
            regions_considered: snapshot.regions_in(tables),
        })
    }
}

/// Build a strategy from the command-line selection
pub fn build_strategy(
    kind: StrategyKind,
    factor: Option<&str>,
) -> std::result::Result<Box<dyn BalanceStrategy>, ConfigError> {
    match kind {
        StrategyKind::FactorWeighted => {
            let name = factor.ok_or_else(|| ConfigError::MissingFactor(kind.name().to_string()))?;
            Ok(Box::new(FactorWeightedStrategy::new(BalanceFactor::parse(name)?)))
        }
        StrategyKind::RoundRobin | StrategyKind::Default => {
            if let Some(name) = factor {
                warn!(factor = name, strategy = %kind, "Balance factor is ignored by this strategy");
            }
            Ok(match kind {
                StrategyKind::RoundRobin => Box::new(RoundRobinStrategy),
                _ => Box::new(DelegateStrategy),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regionctl_core::{RegionInfo, ServerName};
    use std::collections::BTreeMap;

    fn table(name: &str) -> TableName {
        TableName::parse(name).unwrap()
    }

    fn snapshot(tables: &[&str], roster: Vec<ServerName>) -> ClusterSnapshot {
        let tables: BTreeSet<_> = tables.iter().map(|t| table(t)).collect();
        let host = roster.first().cloned().unwrap_or_else(|| ServerName::new("rs1", 16020, 1));
        let assignments: Vec<_> = tables
            .iter()
            .map(|t| (RegionInfo::new(t.clone(), "", "", 1), host.clone()))
            .collect();
        ClusterSnapshot::from_parts(tables, assignments, roster, BTreeMap::new())
    }

    #[test]
    fn test_strategy_kind_parse() {
        assert_eq!(StrategyKind::parse("default").unwrap(), StrategyKind::Default);
        assert_eq!(StrategyKind::parse("RR").unwrap(), StrategyKind::RoundRobin);
        assert_eq!(StrategyKind::parse("St").unwrap(), StrategyKind::FactorWeighted);
        assert_eq!(StrategyKind::parse("fw").unwrap(), StrategyKind::FactorWeighted);
        assert!(matches!(
            StrategyKind::parse("random"),
            Err(ConfigError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_factor_weighted_requires_factor() {
        let err = build_strategy(StrategyKind::FactorWeighted, None).err().unwrap();
        assert!(matches!(err, ConfigError::MissingFactor(_)));

        let err = build_strategy(StrategyKind::FactorWeighted, Some("bogus")).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownFactor(_, _)));

        let strategy = build_strategy(StrategyKind::FactorWeighted, Some("ss")).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::FactorWeighted);
    }

    #[test]
    fn test_factor_ignored_for_round_robin() {
        let strategy = build_strategy(StrategyKind::RoundRobin, Some("ss")).unwrap();
        assert_eq!(strategy.kind(), StrategyKind::RoundRobin);
    }

    #[test]
    fn test_validate_empty_inputs() {
        let a = ServerName::new("rs1", 16020, 1);
        let snap = snapshot(&["t1"], vec![a]);
        assert!(matches!(
            validate(&snap, &BTreeSet::new()),
            Err(PlanError::EmptyTableSet)
        ));

        let empty_roster = snapshot(&["t1"], vec![]);
        let tables: BTreeSet<_> = [table("t1")].into_iter().collect();
        assert!(matches!(
            validate(&empty_roster, &tables),
            Err(PlanError::EmptyRoster)
        ));
    }

    #[test]
    fn test_validate_inconsistent_snapshot() {
        let a = ServerName::new("rs1", 16020, 1);
        let snap = snapshot(&["t1"], vec![a.clone()]);
        let tables: BTreeSet<_> = [table("t1"), table("t2")].into_iter().collect();
        assert!(matches!(
            validate(&snap, &tables),
            Err(PlanError::InconsistentSnapshot(_))
        ));

        // Region of a table the snapshot was not taken for
        let stray = ClusterSnapshot::from_parts(
            [table("t1")].into_iter().collect(),
            vec![(RegionInfo::new(table("t9"), "", "", 1), a.clone())],
            vec![a],
            BTreeMap::new(),
        );
        let tables: BTreeSet<_> = [table("t1")].into_iter().collect();
        assert!(matches!(
            validate(&stray, &tables),
            Err(PlanError::InconsistentSnapshot(_))
        ));
    }

    #[test]
    fn test_delegate_placement() {
        let a = ServerName::new("rs1", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        let snap = snapshot(&["t1", "t2", "t3"], vec![a, b]);
        let tables = snap.tables().clone();

        let placement = DelegateStrategy.plan(&snap, &tables).unwrap();
        assert_eq!(placement.regions_considered(), 3);
        assert_eq!(placement.estimated_fraction(), 1.0);
        assert_eq!(placement.tables().len(), 3);
        assert!(matches!(placement, Placement::Delegate { .. }));
    }
}
