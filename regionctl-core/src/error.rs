//! Error types for regionctl
//!
//! Provides a unified error type shared by the balancer library and the CLI.
//! Every variant belongs to an [`ErrorCategory`], which is what the binary
//! turns into an exit code and what decides whether the alert hook fires.

use thiserror::Error;

/// Result type alias for regionctl operations
pub type Result<T> = std::result::Result<T, RegionCtlError>;

/// Coarse error classes surfaced to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Operator-correctable input problem, detected before touching the cluster
    Configuration,
    /// Snapshot/plan inconsistency, detected before any move is dispatched
    Planning,
    /// Safety gate refused to proceed without an explicit override
    SafetyGate,
    /// The cluster could not be reached or refused the operation
    Cluster,
    /// Bug or unexpected state
    Internal,
    /// Operator interrupted the run before every move was resolved
    Cancelled,
}

impl ErrorCategory {
    /// Whether an error of this class should be forwarded to the alert hook
    pub fn is_alertable(self) -> bool {
        matches!(self, ErrorCategory::Cluster | ErrorCategory::Internal)
    }
}

/// Unified error type for regionctl
#[derive(Error, Debug)]
pub enum RegionCtlError {
    // ===== Model Errors =====
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    // ===== Plan Errors =====
    #[error("Region {0} appears more than once in the plan")]
    DuplicateRegion(String),

    #[error("Destination {server} for region {region} is not in the server roster")]
    UnknownDestination { region: String, server: String },

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Cluster Errors =====
    #[error("Cluster error: {0}")]
    Cluster(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RegionCtlError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            RegionCtlError::InvalidTableName(_)
            | RegionCtlError::InvalidServerName(_)
            | RegionCtlError::Configuration(_) => ErrorCategory::Configuration,
            RegionCtlError::DuplicateRegion(_) | RegionCtlError::UnknownDestination { .. } => {
                ErrorCategory::Planning
            }
            RegionCtlError::Cluster(_) | RegionCtlError::Io(_) => ErrorCategory::Cluster,
            RegionCtlError::Internal(_) => ErrorCategory::Internal,
        }
    }
}
