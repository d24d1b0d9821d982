//! Round-robin strategy
//!
//! Spreads every table's regions evenly over the live servers: region `i`
//! of a table (start-key order) goes to server `(i + k) % S` of the sorted
//! roster. The rotation `k` is chosen to keep as many regions in place as
//! possible, so a table that is already round-robin placed produces no
//! moves. Tables whose per-server counts already differ by at most one and
//! that have no region on a dead server are left alone.

use regionctl_core::{MovePlan, RegionMove, TableName};
use std::collections::BTreeSet;
use tracing::debug;

use crate::planner::{BalanceStrategy, Placement, Result, StrategyKind};
use crate::snapshot::ClusterSnapshot;

#[derive(Debug, Clone, Default)]
pub struct RoundRobinStrategy;

impl RoundRobinStrategy {
    fn is_balanced(snapshot: &ClusterSnapshot, table: &TableName) -> bool {
        let regions = snapshot.regions_of(table);
        if regions.iter().any(|(_, host)| !snapshot.is_live(host)) {
            return false;
        }
        let counts = snapshot.server_counts(table);
        let max = counts.values().copied().max().unwrap_or(0);
        let min = counts.values().copied().min().unwrap_or(0);
        max - min <= 1
    }
}

impl BalanceStrategy for RoundRobinStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn place(&self, snapshot: &ClusterSnapshot, tables: &BTreeSet<TableName>) -> Result<Placement> {
        let roster = snapshot.roster();
        let servers = roster.len();
        let mut plan = MovePlan::new(roster, snapshot.regions_in(tables));

        for table in tables {
            if Self::is_balanced(snapshot, table) {
                debug!(table = %table, "Table already evenly spread");
                continue;
            }

            let regions = snapshot.regions_of(table);
            let rotation = (0..servers)
                .max_by_key(|&k| {
                    let kept = regions
                        .iter()
                        .enumerate()
                        .filter(|(i, (_, host))| *host == &roster[(i + k) % servers])
                        .count();
                    // Ties go to the smallest rotation
                    (kept, std::cmp::Reverse(k))
                })
                .unwrap_or(0);

            for (i, (region, host)) in regions.into_iter().enumerate() {
                let destination = &roster[(i + rotation) % servers];
                if host != destination {
                    plan.push(RegionMove {
                        region: region.clone(),
                        source: host.clone(),
                        destination: destination.clone(),
                    })?;
                }
            }
        }

        Ok(Placement::Moves(plan))
    }
}
