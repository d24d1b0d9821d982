//! Balance factors
//!
//! A factor turns a server's load figures into a positive placement weight.
//! The factor-weighted strategy gives each server a share of every table
//! proportional to its weight.

use regionctl_core::ServerLoad;
use std::fmt;

use crate::config::ConfigError;

/// Weighting used by the factor-weighted strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceFactor {
    /// Every server weighs the same
    Uniform,
    /// Proportional to the server's maximum heap
    Heap,
    /// Servers holding more store file data get less
    StoreFileSize,
    /// Busier servers get less
    RequestCount,
}

const FACTOR_NAMES: &str = "uniform, heap, ss, rq";

impl BalanceFactor {
    /// Parse a factor name (case-insensitive)
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "uniform" | "u" => Ok(BalanceFactor::Uniform),
            "heap" | "hm" => Ok(BalanceFactor::Heap),
            "ss" | "storefile" | "store-file-size" => Ok(BalanceFactor::StoreFileSize),
            "rq" | "requests" | "request-count" => Ok(BalanceFactor::RequestCount),
            _ => Err(ConfigError::UnknownFactor(
                name.to_string(),
                FACTOR_NAMES.to_string(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BalanceFactor::Uniform => "uniform",
            BalanceFactor::Heap => "heap",
            BalanceFactor::StoreFileSize => "ss",
            BalanceFactor::RequestCount => "rq",
        }
    }

    /// Placement weight for a server; always strictly positive
    pub fn weight(&self, load: &ServerLoad) -> f64 {
        match self {
            BalanceFactor::Uniform => 1.0,
            BalanceFactor::Heap => (load.max_heap_mb as f64).max(1.0),
            BalanceFactor::StoreFileSize => {
                1.0 / (1.0 + load.store_file_size_mb as f64 / 1024.0)
            }
            BalanceFactor::RequestCount => 1.0 / (1.0 + load.request_count as f64 / 1000.0),
        }
    }
}

impl fmt::Display for BalanceFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
