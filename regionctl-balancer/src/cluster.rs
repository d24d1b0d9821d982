//! Cluster administration seam
//!
//! Everything the balancer needs from the master goes through
//! [`ClusterAdmin`]. Two implementations ship with the crate: an HTTP client
//! for a master admin gateway and an in-memory sandbox cluster.

use async_trait::async_trait;
use regionctl_core::{RegionInfo, ServerLoad, ServerName, TableName};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ConfigError;
use crate::http::HttpClusterAdmin;
use crate::memory::MemoryCluster;

/// Errors returned by cluster operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("RPC failed: {0}")]
    Rpc(String),

    #[error("Destination {destination} rejected region {region}: {reason}")]
    Rejected {
        region: String,
        destination: String,
        reason: String,
    },

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Invalid response from cluster: {0}")]
    InvalidResponse(String),
}

impl ClusterError {
    /// Whether repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Unreachable(_) | ClusterError::Rpc(_) | ClusterError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

/// Administrative operations against a cluster master
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// All tables in the catalog
    async fn list_tables(&self) -> Result<Vec<TableName>>;

    /// Current region-to-server assignments restricted to `tables`
    async fn current_assignments(
        &self,
        tables: &BTreeSet<TableName>,
    ) -> Result<Vec<(RegionInfo, ServerName)>>;

    /// Live region servers eligible to host regions
    async fn server_roster(&self) -> Result<Vec<ServerName>>;

    /// Load figures for one server
    async fn server_load(&self, _server: &ServerName) -> Result<ServerLoad> {
        Ok(ServerLoad::default())
    }

    /// Ask the master to relocate a region. Returns once the request is
    /// accepted, not when the region is open on the destination.
    async fn move_region(&self, region: &RegionInfo, destination: &ServerName) -> Result<()>;

    /// Server the region is currently open on, if any
    async fn region_location(&self, region: &RegionInfo) -> Result<Option<ServerName>>;

    /// Run the master's own balancer over `tables`. Returns whether it
    /// decided to move anything.
    async fn balancer_run(&self, tables: &BTreeSet<TableName>) -> Result<bool>;
}

#[async_trait]
impl<T: ClusterAdmin + ?Sized> ClusterAdmin for Arc<T> {
    async fn list_tables(&self) -> Result<Vec<TableName>> {
        (**self).list_tables().await
    }

    async fn current_assignments(
        &self,
        tables: &BTreeSet<TableName>,
    ) -> Result<Vec<(RegionInfo, ServerName)>> {
        (**self).current_assignments(tables).await
    }

    async fn server_roster(&self) -> Result<Vec<ServerName>> {
        (**self).server_roster().await
    }

    async fn server_load(&self, server: &ServerName) -> Result<ServerLoad> {
        (**self).server_load(server).await
    }

    async fn move_region(&self, region: &RegionInfo, destination: &ServerName) -> Result<()> {
        (**self).move_region(region, destination).await
    }

    async fn region_location(&self, region: &RegionInfo) -> Result<Option<ServerName>> {
        (**self).region_location(region).await
    }

    async fn balancer_run(&self, tables: &BTreeSet<TableName>) -> Result<bool> {
        (**self).balancer_run(tables).await
    }
}

/// Where the cluster lives, parsed from the `<endpoint>` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEndpoint {
    /// Master admin gateway reachable over HTTP
    Http(String),
    /// JSON topology file backing an in-memory sandbox cluster
    Sandbox(PathBuf),
}

impl ClusterEndpoint {
    /// Parse an endpoint string
    ///
    /// `http://` and `https://` URLs are used as-is, `file://` paths and
    /// `.json` files open a sandbox, and a bare `host[:port]` is treated as
    /// an HTTP gateway. Coordination quorum lists (`zk1,zk2:2181`) are not
    /// supported.
    pub fn parse(endpoint: &str) -> std::result::Result<Self, ConfigError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::UnsupportedEndpoint(
                endpoint.to_string(),
                "endpoint is empty".to_string(),
            ));
        }

        if let Some(path) = endpoint.strip_prefix("file://") {
            return Ok(ClusterEndpoint::Sandbox(PathBuf::from(path)));
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(ClusterEndpoint::Http(
                endpoint.trim_end_matches('/').to_string(),
            ));
        }
        if endpoint.ends_with(".json") {
            return Ok(ClusterEndpoint::Sandbox(PathBuf::from(endpoint)));
        }
        if endpoint.contains(',') {
            return Err(ConfigError::UnsupportedEndpoint(
                endpoint.to_string(),
                "quorum lists are not supported, point at the master admin gateway".to_string(),
            ));
        }
        Ok(ClusterEndpoint::Http(format!("http://{}", endpoint)))
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, ClusterEndpoint::Sandbox(_))
    }

    /// Open an admin handle for this endpoint
    pub fn connect(&self) -> std::result::Result<Arc<dyn ClusterAdmin>, ClusterError> {
        match self {
            ClusterEndpoint::Http(url) => Ok(Arc::new(HttpClusterAdmin::new(url)?)),
            ClusterEndpoint::Sandbox(path) => Ok(Arc::new(MemoryCluster::load(path)?)),
        }
    }
}

impl std::fmt::Display for ClusterEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterEndpoint::Http(url) => f.write_str(url),
            ClusterEndpoint::Sandbox(path) => write!(f, "file://{}", path.display()),
        }
    }
}
