//! Cluster snapshot
//!
//! A point-in-time, read-only view of region placement for the resolved
//! tables, plus the live server roster and per-server load. Strategies plan
//! exclusively against a snapshot; it is never refreshed mid-plan.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use regionctl_core::{RegionInfo, ServerLoad, ServerName, TableName};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, warn};

use crate::cluster::{ClusterAdmin, ClusterError};

#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    tables: BTreeSet<TableName>,
    assignments: BTreeMap<RegionInfo, ServerName>,
    roster: Vec<ServerName>,
    loads: BTreeMap<ServerName, ServerLoad>,
    captured_at: DateTime<Utc>,
}

impl ClusterSnapshot {
    /// Read assignments, roster and loads for `tables`
    ///
    /// A failed load query for one server is logged and replaced by an
    /// empty load; a failed assignment or roster query fails the capture.
    #[instrument(skip(admin, tables), fields(tables = tables.len()))]
    pub async fn capture(
        admin: &dyn ClusterAdmin,
        tables: &BTreeSet<TableName>,
    ) -> Result<Self, ClusterError> {
        let assignments = admin.current_assignments(tables).await?;
        let roster = admin.server_roster().await?;

        let results = join_all(roster.iter().map(|server| admin.server_load(server))).await;
        let mut loads = BTreeMap::new();
        for (server, result) in roster.iter().zip(results) {
            match result {
                Ok(load) => {
                    loads.insert(server.clone(), load);
                }
                Err(ClusterError::Unreachable(reason)) => {
                    return Err(ClusterError::Unreachable(reason));
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Server load unavailable, assuming empty");
                    loads.insert(server.clone(), ServerLoad::default());
                }
            }
        }

        let snapshot = Self::from_parts(tables.clone(), assignments, roster, loads);
        debug!(
            regions = snapshot.region_count(),
            servers = snapshot.roster().len(),
            "Captured cluster snapshot"
        );
        Ok(snapshot)
    }

    /// Assemble a snapshot from already-fetched parts
    pub fn from_parts(
        tables: BTreeSet<TableName>,
        assignments: impl IntoIterator<Item = (RegionInfo, ServerName)>,
        roster: impl IntoIterator<Item = ServerName>,
        loads: BTreeMap<ServerName, ServerLoad>,
    ) -> Self {
        let roster: BTreeSet<ServerName> = roster.into_iter().collect();
        Self {
            tables,
            assignments: assignments.into_iter().collect(),
            roster: roster.into_iter().collect(),
            loads,
            captured_at: Utc::now(),
        }
    }

    pub fn tables(&self) -> &BTreeSet<TableName> {
        &self.tables
    }

    /// Live servers, sorted and deduplicated
    pub fn roster(&self) -> &[ServerName] {
        &self.roster
    }

    pub fn is_live(&self, server: &ServerName) -> bool {
        self.roster.binary_search(server).is_ok()
    }

    pub fn assignments(&self) -> &BTreeMap<RegionInfo, ServerName> {
        &self.assignments
    }

    pub fn load(&self, server: &ServerName) -> Option<&ServerLoad> {
        self.loads.get(server)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Total number of regions in the snapshot
    pub fn region_count(&self) -> usize {
        self.assignments.len()
    }

    /// Regions of one table in start-key order, with their hosts
    pub fn regions_of(&self, table: &TableName) -> Vec<(&RegionInfo, &ServerName)> {
        self.assignments
            .iter()
            .filter(|(region, _)| &region.table == table)
            .collect()
    }

    /// Number of regions belonging to `tables`
    pub fn regions_in(&self, tables: &BTreeSet<TableName>) -> usize {
        self.assignments
            .keys()
            .filter(|region| tables.contains(&region.table))
            .count()
    }

    /// Region count per live server for one table (servers without regions
    /// included with zero)
    pub fn server_counts(&self, table: &TableName) -> BTreeMap<ServerName, usize> {
        let mut counts: BTreeMap<ServerName, usize> =
            self.roster.iter().map(|s| (s.clone(), 0)).collect();
        for (region, server) in &self.assignments {
            if &region.table == table {
                if let Some(count) = counts.get_mut(server) {
                    *count += 1;
                }
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterAdmin;

    fn table(name: &str) -> TableName {
        TableName::parse(name).unwrap()
    }

    #[test]
    fn test_server_counts_include_empty_servers() {
        let a = ServerName::new("rs1", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        let dead = ServerName::new("rs9", 16020, 1);
        let t1 = table("t1");

        let snapshot = ClusterSnapshot::from_parts(
            [t1.clone()].into_iter().collect(),
            vec![
                (RegionInfo::new(t1.clone(), "", "m", 1), a.clone()),
                (RegionInfo::new(t1.clone(), "m", "", 2), dead.clone()),
            ],
            vec![b.clone(), a.clone(), a.clone()],
            BTreeMap::new(),
        );

        assert_eq!(snapshot.roster(), &[a.clone(), b.clone()]);
        let counts = snapshot.server_counts(&t1);
        assert_eq!(counts.get(&a), Some(&1));
        assert_eq!(counts.get(&b), Some(&0));
        assert!(!counts.contains_key(&dead));
        assert!(!snapshot.is_live(&dead));
        assert_eq!(snapshot.regions_of(&t1)[0].0.start_key, "");
    }

    #[tokio::test]
    async fn test_capture_tolerates_missing_load() {
        let t1 = table("t1");
        let a = ServerName::new("rs1", 16020, 1);
        let region = RegionInfo::new(t1.clone(), "", "", 1);

        let mut admin = MockClusterAdmin::new();
        let assigned = (region.clone(), a.clone());
        admin
            .expect_current_assignments()
            .returning(move |_| Ok(vec![assigned.clone()]));
        let roster = a.clone();
        admin
            .expect_server_roster()
            .returning(move || Ok(vec![roster.clone()]));
        admin
            .expect_server_load()
            .returning(|s| Err(ClusterError::UnknownServer(s.to_string())));

        let tables: BTreeSet<_> = [t1].into_iter().collect();
        let snapshot = ClusterSnapshot::capture(&admin, &tables).await.unwrap();
        assert_eq!(snapshot.region_count(), 1);
        assert_eq!(snapshot.load(&a), Some(&ServerLoad::default()));
    }

    #[tokio::test]
    async fn test_capture_propagates_unreachable() {
        let mut admin = MockClusterAdmin::new();
        admin
            .expect_current_assignments()
            .returning(|_| Err(ClusterError::Unreachable("connection refused".into())));

        let tables: BTreeSet<_> = [table("t1")].into_iter().collect();
        let err = ClusterSnapshot::capture(&admin, &tables).await.unwrap_err();
        assert!(matches!(err, ClusterError::Unreachable(_)));
    }
}
