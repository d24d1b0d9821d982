//! regionctl core library
//!
//! Shared model for the region balancing tool:
//! - Cluster identifiers (tables, region servers, regions)
//! - Move plans and their invariants
//! - Per-move outcomes and the run report
//! - Common error handling

pub mod error;
pub mod plan;
pub mod region;
pub mod report;

pub use error::{ErrorCategory, RegionCtlError, Result};
pub use plan::{MovePlan, RegionMove};
pub use region::{RegionInfo, ServerLoad, ServerName, TableName, DEFAULT_NAMESPACE};
pub use report::{MoveOutcome, MoveRecord, MoveReport};
