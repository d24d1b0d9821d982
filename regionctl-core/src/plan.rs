//! Move plans
//!
//! A plan is the ordered list of region moves a strategy wants applied. It
//! enforces its own invariants on insertion: every destination is a member
//! of the roster the plan was built against, and a region is moved at most
//! once.

use crate::error::{RegionCtlError, Result};
use crate::region::{RegionInfo, ServerName, TableName};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Directive to relocate one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMove {
    pub region: RegionInfo,
    /// Host at snapshot time
    pub source: ServerName,
    pub destination: ServerName,
}

/// Ordered sequence of region moves
#[derive(Debug, Clone, Default)]
pub struct MovePlan {
    moves: Vec<RegionMove>,
    roster: BTreeSet<ServerName>,
    planned_regions: HashSet<String>,
    /// Number of regions the plan was computed over
    regions_considered: usize,
}

impl MovePlan {
    /// Create an empty plan for a server roster
    pub fn new<'a>(roster: impl IntoIterator<Item = &'a ServerName>, regions_considered: usize) -> Self {
        Self {
            moves: Vec::new(),
            roster: roster.into_iter().cloned().collect(),
            planned_regions: HashSet::new(),
            regions_considered,
        }
    }

    /// Append a move, rejecting duplicates and unknown destinations
    pub fn push(&mut self, mv: RegionMove) -> Result<()> {
        if !self.roster.contains(&mv.destination) {
            return Err(RegionCtlError::UnknownDestination {
                region: mv.region.encoded_name.clone(),
                server: mv.destination.to_string(),
            });
        }
        if !self.planned_regions.insert(mv.region.encoded_name.clone()) {
            return Err(RegionCtlError::DuplicateRegion(mv.region.encoded_name.clone()));
        }
        self.moves.push(mv);
        Ok(())
    }

    pub fn moves(&self) -> &[RegionMove] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn roster(&self) -> &BTreeSet<ServerName> {
        &self.roster
    }

    pub fn regions_considered(&self) -> usize {
        self.regions_considered
    }

    /// Fraction of the considered regions this plan relocates
    pub fn move_fraction(&self) -> f64 {
        if self.regions_considered == 0 {
            0.0
        } else {
            self.moves.len() as f64 / self.regions_considered as f64
        }
    }

    /// Tables touched by at least one move
    pub fn tables(&self) -> BTreeSet<TableName> {
        self.moves.iter().map(|m| m.region.table.clone()).collect()
    }

    /// Number of incoming moves per destination
    pub fn moves_per_destination(&self) -> BTreeMap<ServerName, usize> {
        let mut counts = BTreeMap::new();
        for mv in &self.moves {
            *counts.entry(mv.destination.clone()).or_default() += 1;
        }
        counts
    }

    /// Summary of the plan
    pub fn summary(&self) -> String {
        format!(
            "{} moves over {} regions ({:.1}%), {} tables, {} destination servers",
            self.moves.len(),
            self.regions_considered,
            self.move_fraction() * 100.0,
            self.tables().len(),
            self.moves_per_destination().len()
        )
    }
}

impl IntoIterator for MovePlan {
    type Item = RegionMove;
    type IntoIter = std::vec::IntoIter<RegionMove>;

    fn into_iter(self) -> Self::IntoIter {
        self.moves.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(start: &str, id: u64) -> RegionInfo {
        RegionInfo::new(TableName::parse("t1").unwrap(), start, "", id)
    }

    #[test]
    fn test_push_rejects_unknown_destination() {
        let a = ServerName::new("rs1", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        let mut plan = MovePlan::new([&a], 1);

        let err = plan
            .push(RegionMove {
                region: region("", 1),
                source: a.clone(),
                destination: b,
            })
            .unwrap_err();
        assert!(matches!(err, RegionCtlError::UnknownDestination { .. }));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_push_rejects_duplicate_region() {
        let a = ServerName::new("rs1", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        let mut plan = MovePlan::new([&a, &b], 2);

        let mv = RegionMove {
            region: region("", 1),
            source: a.clone(),
            destination: b.clone(),
        };
        plan.push(mv.clone()).unwrap();
        assert!(matches!(
            plan.push(mv).unwrap_err(),
            RegionCtlError::DuplicateRegion(_)
        ));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_move_fraction_and_summary() {
        let a = ServerName::new("rs1", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        let mut plan = MovePlan::new([&a, &b], 4);
        assert_eq!(plan.move_fraction(), 0.0);

        plan.push(RegionMove {
            region: region("m", 2),
            source: a,
            destination: b,
        })
        .unwrap();

        assert_eq!(plan.move_fraction(), 0.25);
        let summary = plan.summary();
        assert!(summary.contains("1 moves over 4 regions"));
        assert!(summary.contains("1 tables"));
    }
}
