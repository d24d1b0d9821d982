//! In-memory cluster
//!
//! A [`ClusterAdmin`] backed by a local assignment map. Used as the sandbox
//! behind `file://` endpoints and as the cluster in tests. Supports fault
//! injection per region, a configurable open delay after a move, and a
//! simple count-levelling stand-in for the master balancer.

use async_trait::async_trait;
use parking_lot::RwLock;
use regionctl_core::{RegionInfo, ServerLoad, ServerName, TableName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cluster::{ClusterAdmin, ClusterError, Result};

/// One region and its host in a topology file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionAssignment {
    #[serde(flatten)]
    pub region: RegionInfo,
    pub server: ServerName,
}

/// Serialized cluster state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    /// Live region servers
    #[serde(default)]
    pub servers: Vec<ServerName>,
    /// Per-server load figures
    #[serde(default)]
    pub loads: BTreeMap<ServerName, ServerLoad>,
    /// Tables in the catalog, including tables without regions
    #[serde(default)]
    pub tables: Vec<TableName>,
    /// Region assignments (hosts need not be live)
    #[serde(default)]
    pub regions: Vec<RegionAssignment>,
}

/// Injected behaviour for moves of a single region
#[derive(Debug, Clone, PartialEq)]
pub enum MoveFault {
    /// Fail the next `n` move requests with a retryable RPC error
    FailTimes(u32),
    /// Refuse every move request
    Reject(String),
    /// Accept move requests but never open the region anywhere
    Stuck,
}

#[derive(Debug, Default)]
struct ClusterState {
    servers: BTreeSet<ServerName>,
    loads: BTreeMap<ServerName, ServerLoad>,
    tables: BTreeSet<TableName>,
    assignments: BTreeMap<RegionInfo, ServerName>,
    /// Regions closed on their source and not yet open on the destination
    in_transition: HashMap<String, (ServerName, Instant)>,
    faults: HashMap<String, MoveFault>,
}

impl ClusterState {
    fn region_by_name(&self, encoded: &str) -> Option<RegionInfo> {
        self.assignments
            .keys()
            .find(|r| r.encoded_name == encoded)
            .cloned()
    }
}

/// In-memory cluster implementation
pub struct MemoryCluster {
    state: RwLock<ClusterState>,
    reachable: AtomicBool,
    open_delay: RwLock<Duration>,
    move_requests: AtomicU64,
    balancer_runs: AtomicU64,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ClusterState::default()),
            reachable: AtomicBool::new(true),
            open_delay: RwLock::new(Duration::ZERO),
            move_requests: AtomicU64::new(0),
            balancer_runs: AtomicU64::new(0),
        }
    }

    /// Build a cluster from a topology
    pub fn from_topology(topology: Topology) -> Self {
        let cluster = Self::new();
        {
            let mut state = cluster.state.write();
            state.servers.extend(topology.servers);
            state.loads = topology.loads;
            state.tables.extend(topology.tables);
            for entry in topology.regions {
                let region = entry.region.with_derived_name();
                state.tables.insert(region.table.clone());
                state.assignments.insert(region, entry.server);
            }
        }
        cluster
    }

    /// Load a topology JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ClusterError::Unreachable(format!("cannot read topology {}: {}", path.display(), e))
        })?;
        let topology: Topology = serde_json::from_str(&data).map_err(|e| {
            ClusterError::InvalidResponse(format!("bad topology {}: {}", path.display(), e))
        })?;
        info!(
            path = %path.display(),
            servers = topology.servers.len(),
            regions = topology.regions.len(),
            "Loaded sandbox topology"
        );
        Ok(Self::from_topology(topology))
    }

    /// Write the current state back as a topology JSON file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.topology())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Export the current state
    pub fn topology(&self) -> Topology {
        let state = self.state.read();
        Topology {
            servers: state.servers.iter().cloned().collect(),
            loads: state.loads.clone(),
            tables: state.tables.iter().cloned().collect(),
            regions: state
                .assignments
                .iter()
                .map(|(region, server)| RegionAssignment {
                    region: region.clone(),
                    server: server.clone(),
                })
                .collect(),
        }
    }

    pub fn add_server(&self, server: ServerName) {
        self.state.write().servers.insert(server);
    }

    pub fn set_load(&self, server: &ServerName, load: ServerLoad) {
        self.state.write().loads.insert(server.clone(), load);
    }

    /// Create a table pre-split at `split_keys`, every region on `server`
    pub fn create_table(
        &self,
        table: &TableName,
        split_keys: &[&str],
        server: &ServerName,
    ) -> Vec<RegionInfo> {
        let mut boundaries = vec![""];
        boundaries.extend_from_slice(split_keys);

        let mut state = self.state.write();
        state.tables.insert(table.clone());
        let mut created = Vec::with_capacity(boundaries.len());
        for (i, start) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).copied().unwrap_or("");
            let region = RegionInfo::new(table.clone(), *start, end, 1_000 + i as u64);
            state.assignments.insert(region.clone(), server.clone());
            created.push(region);
        }
        created
    }

    /// Assign (or reassign) a single region
    pub fn assign(&self, region: RegionInfo, server: ServerName) {
        let mut state = self.state.write();
        state.tables.insert(region.table.clone());
        state.assignments.insert(region, server);
    }

    pub fn inject_fault(&self, region: &RegionInfo, fault: MoveFault) {
        self.state
            .write()
            .faults
            .insert(region.encoded_name.clone(), fault);
    }

    /// Make every call fail with `Unreachable`
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay between a move request and the region opening on its destination
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.write() = delay;
    }

    /// Current assignments keyed by region
    pub fn assignments(&self) -> BTreeMap<RegionInfo, ServerName> {
        self.state.read().assignments.clone()
    }

    /// Regions of `table` hosted on `server`
    pub fn regions_on(&self, table: &TableName, server: &ServerName) -> usize {
        self.state
            .read()
            .assignments
            .iter()
            .filter(|(r, s)| &r.table == table && *s == server)
            .count()
    }

    /// Number of `move_region` calls received, failed ones included
    pub fn move_requests(&self) -> u64 {
        self.move_requests.load(Ordering::SeqCst)
    }

    /// Number of `balancer_run` calls received
    pub fn balancer_runs(&self) -> u64 {
        self.balancer_runs.load(Ordering::SeqCst)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClusterError::Unreachable("sandbox cluster is offline".to_string()))
        }
    }

    /// Open regions whose transition delay has elapsed
    fn settle(&self, state: &mut ClusterState) {
        let delay = *self.open_delay.read();
        let ready: Vec<String> = state
            .in_transition
            .iter()
            .filter(|(_, (_, since))| since.elapsed() >= delay)
            .map(|(name, _)| name.clone())
            .collect();
        for name in ready {
            if let Some((destination, _)) = state.in_transition.remove(&name) {
                if let Some(region) = state.region_by_name(&name) {
                    state.assignments.insert(region, destination);
                }
            }
        }
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterAdmin for MemoryCluster {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        self.ensure_reachable()?;
        Ok(self.state.read().tables.iter().cloned().collect())
    }

    async fn current_assignments(
        &self,
        tables: &BTreeSet<TableName>,
    ) -> Result<Vec<(RegionInfo, ServerName)>> {
        self.ensure_reachable()?;
        let mut state = self.state.write();
        self.settle(&mut state);
        Ok(state
            .assignments
            .iter()
            .filter(|(region, _)| tables.contains(&region.table))
            .map(|(region, server)| (region.clone(), server.clone()))
            .collect())
    }

    async fn server_roster(&self) -> Result<Vec<ServerName>> {
        self.ensure_reachable()?;
        Ok(self.state.read().servers.iter().cloned().collect())
    }

    async fn server_load(&self, server: &ServerName) -> Result<ServerLoad> {
        self.ensure_reachable()?;
        let state = self.state.read();
        if !state.servers.contains(server) {
            return Err(ClusterError::UnknownServer(server.to_string()));
        }
        let mut load = state.loads.get(server).cloned().unwrap_or_default();
        load.region_count = state.assignments.values().filter(|s| *s == server).count() as u32;
        Ok(load)
    }

    async fn move_region(&self, region: &RegionInfo, destination: &ServerName) -> Result<()> {
        self.move_requests.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;

        let mut state = self.state.write();
        if !state.assignments.contains_key(region) {
            return Err(ClusterError::UnknownRegion(region.encoded_name.clone()));
        }
        if !state.servers.contains(destination) {
            return Err(ClusterError::UnknownServer(destination.to_string()));
        }

        match state.faults.get_mut(&region.encoded_name) {
            Some(MoveFault::FailTimes(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(ClusterError::Rpc(format!(
                    "injected failure moving {}",
                    region.encoded_name
                )));
            }
            Some(MoveFault::Reject(reason)) => {
                return Err(ClusterError::Rejected {
                    region: region.encoded_name.clone(),
                    destination: destination.to_string(),
                    reason: reason.clone(),
                });
            }
            Some(MoveFault::Stuck) => {
                debug!(region = %region, "Move accepted but region is stuck");
                return Ok(());
            }
            _ => {}
        }

        debug!(region = %region, destination = %destination, "Move accepted");
        state
            .in_transition
            .insert(region.encoded_name.clone(), (destination.clone(), Instant::now()));
        self.settle(&mut state);
        Ok(())
    }

    async fn region_location(&self, region: &RegionInfo) -> Result<Option<ServerName>> {
        self.ensure_reachable()?;
        let mut state = self.state.write();
        self.settle(&mut state);

        if state.in_transition.contains_key(&region.encoded_name) {
            return Ok(None);
        }
        match state.assignments.get(region) {
            Some(server) => Ok(Some(server.clone())),
            None => Err(ClusterError::UnknownRegion(region.encoded_name.clone())),
        }
    }

    async fn balancer_run(&self, tables: &BTreeSet<TableName>) -> Result<bool> {
        self.balancer_runs.fetch_add(1, Ordering::SeqCst);
        self.ensure_reachable()?;

        let mut state = self.state.write();
        self.settle(&mut state);
        if state.servers.is_empty() {
            return Ok(false);
        }

        // Level region counts over all requested tables together
        let mut hosted: BTreeMap<ServerName, Vec<RegionInfo>> = state
            .servers
            .iter()
            .map(|s| (s.clone(), Vec::new()))
            .collect();
        let mut orphans = Vec::new();
        for (region, host) in &state.assignments {
            if !tables.contains(&region.table) {
                continue;
            }
            match hosted.get_mut(host) {
                Some(list) => list.push(region.clone()),
                None => orphans.push(region.clone()),
            }
        }

        let mut moves: Vec<(RegionInfo, ServerName)> = Vec::new();
        for region in orphans {
            if let Some((target, list)) = hosted.iter_mut().min_by_key(|(_, l)| l.len()) {
                moves.push((region.clone(), target.clone()));
                list.push(region);
            }
        }
        loop {
            let busiest = hosted
                .iter()
                .max_by_key(|(_, l)| l.len())
                .map(|(s, l)| (s.clone(), l.len()));
            let idlest = hosted
                .iter()
                .min_by_key(|(_, l)| l.len())
                .map(|(s, l)| (s.clone(), l.len()));
            let (Some((from, high)), Some((to, low))) = (busiest, idlest) else {
                break;
            };
            if high <= low + 1 {
                break;
            }
            let Some(region) = hosted.get_mut(&from).and_then(|l| l.pop()) else {
                break;
            };
            moves.push((region.clone(), to.clone()));
            if let Some(list) = hosted.get_mut(&to) {
                list.push(region);
            }
        }

        let moved = moves.len();
        for (region, server) in moves {
            state.assignments.insert(region, server);
        }

        info!(tables = tables.len(), moved, "Sandbox balancer run finished");
        Ok(moved > 0)
    }
}
