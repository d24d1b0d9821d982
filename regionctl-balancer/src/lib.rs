//! regionctl Balancer Library
//!
//! Region balancing and migration orchestration for a master-coordinated
//! region cluster.
//!
//! A balance run:
//! - Resolves table patterns against the catalog
//! - Captures a snapshot of region placement
//! - Plans moves with the selected strategy (or delegates to the master)
//! - Checks the plan against the safety gate
//! - Applies the moves, confirming each one, and alerts on failure

pub mod alert;
pub mod cluster;
pub mod command;
pub mod config;
pub mod executor;
pub mod factor;
pub mod gate;
pub mod http;
pub mod memory;
pub mod planner;
pub mod resolver;
pub mod round_robin;
pub mod snapshot;
pub mod weighted;

// Re-export main types
pub use alert::{Alert, AlertError, AlertSink, LogAlertSink, MemoryAlertSink, ScriptAlertSink};
pub use cluster::{ClusterAdmin, ClusterEndpoint, ClusterError};
pub use command::{exit_code, BalanceCommand, BalanceError, BalanceOptions, BalanceOutcome};
pub use config::{BalancerConfig, ConfigError};
pub use executor::{
    ExecutorConfig, ExecutorError, MoveExecutor, MoveMode, ProgressStatus, ProgressUpdate,
};
pub use factor::BalanceFactor;
pub use gate::{GateBlocked, GateDecision, SafetyGate};
pub use http::HttpClusterAdmin;
pub use memory::{MemoryCluster, MoveFault, Topology};
pub use planner::{
    build_strategy, BalanceStrategy, DelegateStrategy, PlanError, Placement, StrategyKind,
};
pub use resolver::{ResolveError, TableSetResolver};
pub use round_robin::RoundRobinStrategy;
pub use snapshot::ClusterSnapshot;
pub use weighted::FactorWeightedStrategy;
