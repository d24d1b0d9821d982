//! End-to-end balance runs against the in-memory cluster
//!
//! Each test builds a small cluster, runs a full balance invocation through
//! `BalanceCommand` and checks what the cluster looks like afterwards.
//!
//! Run with: cargo test -p regionctl-balancer --test balance_scenarios

use regionctl_balancer::{
    exit_code, BalanceCommand, BalanceError, BalanceOptions, BalanceOutcome, BalancerConfig,
    ClusterEndpoint, MemoryAlertSink, MemoryCluster, MoveFault, MoveMode, Placement,
};
use regionctl_core::{MoveOutcome, ServerName, TableName};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn table(name: &str) -> TableName {
    TableName::parse(name).unwrap()
}

fn server(host: &str) -> ServerName {
    ServerName::new(host, 16020, 1)
}

/// Timings short enough for tests, budget of 2 retries
fn fast_config() -> BalancerConfig {
    BalancerConfig {
        move_timeout_secs: 2,
        max_retries: 2,
        retry_delay_ms: 1,
        max_retry_delay_ms: 5,
        poll_interval_ms: 5,
        ..Default::default()
    }
}

/// Cluster with `servers` live servers and table `t1` split at `splits`,
/// every region on the first server
fn cluster_with_table(servers: &[&str], splits: &[&str]) -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    for host in servers {
        cluster.add_server(server(host));
    }
    cluster.create_table(&table("t1"), splits, &server(servers[0]));
    cluster
}

fn forced(patterns: &str, strategy: &str) -> BalanceOptions {
    BalanceOptions {
        force_proceed: true,
        ..BalanceOptions::new(patterns, strategy)
    }
}

#[tokio::test]
async fn test_round_robin_splits_two_regions() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let outcome = command.run(&forced("t1", "rr")).await.unwrap();
    let BalanceOutcome::Applied(report) = outcome else {
        panic!("expected applied moves");
    };

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(cluster.regions_on(&table("t1"), &server("rs1")), 1);
    assert_eq!(cluster.regions_on(&table("t1"), &server("rs2")), 1);
    assert_eq!(cluster.move_requests(), 1);
}

#[tokio::test]
async fn test_half_the_table_needs_force() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    let before = cluster.assignments();
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let err = command
        .run(&BalanceOptions::new("t1", "rr"))
        .await
        .unwrap_err();

    assert!(matches!(err, BalanceError::Blocked(_)));
    assert_eq!(err.exit_code(), exit_code::GATE_BLOCKED);
    assert!(err.to_string().contains("--force-proceed"));
    assert_eq!(cluster.assignments(), before);
    assert_eq!(cluster.move_requests(), 0);
}

#[tokio::test]
async fn test_default_strategy_delegates_to_master() {
    let cluster = Arc::new(MemoryCluster::new());
    let (a, b) = (server("rs1"), server("rs2"));
    cluster.add_server(a.clone());
    cluster.add_server(b.clone());
    for name in ["t1", "t2", "t3"] {
        cluster.create_table(&table(name), &[], &a);
    }
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    // The delegated move count is unknown up front, so the gate needs force
    let err = command
        .run(&BalanceOptions::new("t.*", "default"))
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), exit_code::GATE_BLOCKED);
    assert_eq!(cluster.balancer_runs(), 0);

    let outcome = command.run(&forced("t.*", "default")).await.unwrap();
    let BalanceOutcome::Delegated(report) = outcome else {
        panic!("expected a delegated run");
    };
    assert_eq!(report.balancer_moved, Some(true));
    assert_eq!(cluster.balancer_runs(), 1);
    assert_eq!(cluster.move_requests(), 0);

    let on_b = cluster.assignments().values().filter(|s| **s == b).count();
    assert!(on_b > 0, "all regions still on {}", a);
}

#[tokio::test]
async fn test_unknown_factor_changes_nothing() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["c", "g", "m"]);
    let before = cluster.assignments();
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let options = BalanceOptions {
        factor: Some("bogus".to_string()),
        ..forced("t1", "st")
    };
    let err = command.run(&options).await.unwrap_err();

    assert_eq!(err.exit_code(), exit_code::CONFIGURATION);
    assert!(err.to_string().contains("bogus"));
    assert_eq!(cluster.assignments(), before);
    assert_eq!(cluster.move_requests(), 0);
}

#[tokio::test]
async fn test_configuration_errors_precede_cluster_access() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    cluster.set_reachable(false);
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let err = command.run(&forced("t1", "zigzag")).await.unwrap_err();
    assert_eq!(err.exit_code(), exit_code::CONFIGURATION);

    let err = command.run(&forced("t1", "st")).await.unwrap_err();
    assert_eq!(err.exit_code(), exit_code::CONFIGURATION);

    let err = command.run(&forced("t1,(", "rr")).await.unwrap_err();
    assert_eq!(err.exit_code(), exit_code::CONFIGURATION);
}

#[tokio::test]
async fn test_exhausted_retries_fail_once_and_alert() {
    let cluster = Arc::new(MemoryCluster::new());
    let (a, b) = (server("rs1"), server("rs2"));
    cluster.add_server(a.clone());
    cluster.add_server(b.clone());
    let regions = cluster.create_table(&table("t1"), &["c", "g", "m"], &a);

    // rotation 0 keeps regions 0 and 2 on rs1 and moves 1 and 3 to rs2
    let broken = regions[1].clone();
    cluster.inject_fault(&broken, MoveFault::FailTimes(100));

    let sink = Arc::new(MemoryAlertSink::new());
    let command = BalanceCommand::new(cluster.clone(), fast_config()).with_alert(sink.clone());

    let err = command.run(&forced("t1", "rr")).await.unwrap_err();
    assert_eq!(err.exit_code(), exit_code::MOVES_FAILED);

    let report = err.report().unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.succeeded(), 1);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].region, broken);
    assert_eq!(failures[0].attempts, 3);
    assert_eq!(
        report
            .records
            .iter()
            .filter(|r| r.region == broken)
            .count(),
        1
    );

    // 3 attempts for the broken region, 1 for the healthy one
    assert_eq!(cluster.move_requests(), 4);
    assert_eq!(cluster.assignments().get(&broken), Some(&a));
    assert_eq!(cluster.assignments().get(&regions[3]), Some(&b));

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].body.contains(&broken.encoded_name));
    assert!(alerts[0].subject.contains("1 of 2"));
}

#[tokio::test]
async fn test_rejected_move_is_not_retried() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    let regions: Vec<_> = cluster.assignments().into_keys().collect();
    cluster.inject_fault(&regions[1], MoveFault::Reject("region is splitting".into()));
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let err = command.run(&forced("t1", "rr")).await.unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.failures()[0].attempts, 1);
    assert!(matches!(
        &report.failures()[0].outcome,
        MoveOutcome::Failed { reason } if reason.contains("splitting")
    ));
    assert_eq!(cluster.move_requests(), 1);
}

#[tokio::test]
async fn test_async_moves_with_open_delay() {
    let cluster = cluster_with_table(&["rs1", "rs2", "rs3"], &["b", "c", "d", "e", "f"]);
    cluster.set_open_delay(Duration::from_millis(20));
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let options = BalanceOptions {
        move_mode: MoveMode::Async,
        ..forced("t1", "rr")
    };
    let BalanceOutcome::Applied(report) = command.run(&options).await.unwrap() else {
        panic!("expected applied moves");
    };

    assert_eq!(report.succeeded(), 4);
    for host in ["rs1", "rs2", "rs3"] {
        assert_eq!(cluster.regions_on(&table("t1"), &server(host)), 2);
    }
}

#[tokio::test]
async fn test_factor_weighted_uses_store_file_load() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["b", "c", "d", "e", "f"]);
    cluster.set_load(
        &server("rs1"),
        regionctl_core::ServerLoad {
            store_file_size_mb: 4096,
            ..Default::default()
        },
    );
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let options = BalanceOptions {
        factor: Some("ss".to_string()),
        ..forced("t1", "st")
    };
    let BalanceOutcome::Applied(report) = command.run(&options).await.unwrap() else {
        panic!("expected applied moves");
    };

    // rs1 carries a heavy store file load, so it ends with fewer regions
    assert!(report.succeeded() > 0);
    let on_a = cluster.regions_on(&table("t1"), &server("rs1"));
    let on_b = cluster.regions_on(&table("t1"), &server("rs2"));
    assert_eq!(on_a + on_b, 6);
    assert!(on_a < on_b);
}

#[tokio::test]
async fn test_dry_run_leaves_cluster_untouched() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["c", "g", "m"]);
    let before = cluster.assignments();
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let options = BalanceOptions {
        dry_run: true,
        ..forced("t1", "rr")
    };
    let BalanceOutcome::DryRun(Placement::Moves(plan)) = command.run(&options).await.unwrap()
    else {
        panic!("expected a dry-run plan");
    };

    assert_eq!(plan.len(), 2);
    assert_eq!(cluster.assignments(), before);
    assert_eq!(cluster.move_requests(), 0);
}

#[tokio::test]
async fn test_pattern_order_does_not_change_plan() {
    let cluster = Arc::new(MemoryCluster::new());
    let (a, b, c) = (server("rs1"), server("rs2"), server("rs3"));
    for s in [&a, &b, &c] {
        cluster.add_server(s.clone());
    }
    cluster.create_table(&table("t1"), &["c", "g", "m"], &a);
    cluster.create_table(&table("t2"), &["k"], &b);
    cluster.create_table(&table("orders"), &["x"], &a);
    let command = BalanceCommand::new(cluster.clone(), fast_config());

    let mut plans = Vec::new();
    for patterns in ["t1,t2", "t2 , t1", "t2,t1,t1"] {
        let options = BalanceOptions {
            dry_run: true,
            ..forced(patterns, "rr")
        };
        let BalanceOutcome::DryRun(Placement::Moves(plan)) = command.run(&options).await.unwrap()
        else {
            panic!("expected a dry-run plan");
        };
        plans.push(plan.moves().to_vec());
    }

    assert!(!plans[0].is_empty());
    assert_eq!(plans[0], plans[1]);
    assert_eq!(plans[0], plans[2]);
    assert!(plans[0].iter().all(|m| m.region.table != table("orders")));
}

#[tokio::test]
async fn test_unmatched_patterns_are_configuration_errors() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    let sink = Arc::new(MemoryAlertSink::new());
    let command = BalanceCommand::new(cluster.clone(), fast_config()).with_alert(sink.clone());

    let err = command.run(&forced("missing.*", "rr")).await.unwrap_err();
    assert!(matches!(err, BalanceError::NoTablesMatched(_)));
    assert_eq!(err.exit_code(), exit_code::CONFIGURATION);
    assert!(sink.alerts().is_empty());
}

#[tokio::test]
async fn test_unreachable_cluster_exits_with_cluster_code() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["m"]);
    cluster.set_reachable(false);
    let sink = Arc::new(MemoryAlertSink::new());
    let command = BalanceCommand::new(cluster.clone(), fast_config()).with_alert(sink.clone());

    let err = command.run(&forced("t1", "rr")).await.unwrap_err();
    assert!(matches!(err, BalanceError::ClusterUnavailable(_)));
    assert_eq!(err.exit_code(), exit_code::CLUSTER_UNAVAILABLE);
    assert_eq!(sink.alerts().len(), 1);
}

#[tokio::test]
async fn test_cancelled_sync_run_attempts_nothing() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["c", "g", "m"]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let sink = Arc::new(MemoryAlertSink::new());
    let command = BalanceCommand::new(cluster.clone(), fast_config())
        .with_alert(sink.clone())
        .with_cancellation(cancel.clone());

    let err = command.run(&forced("t1", "rr")).await.unwrap_err();
    assert!(matches!(err, BalanceError::Cancelled { unresolved: 2, total: 2, .. }));
    assert_eq!(err.exit_code(), exit_code::CANCELLED);
    assert_eq!(err.report().unwrap().not_attempted(), 2);
    assert_eq!(cluster.move_requests(), 0);
    assert!(sink.alerts().is_empty());
}

#[tokio::test]
async fn test_cancelled_async_run_still_confirms_dispatched_moves() {
    let cluster = cluster_with_table(&["rs1", "rs2"], &["c", "g", "m"]);
    cluster.set_open_delay(Duration::from_millis(150));
    let cancel = CancellationToken::new();
    let command =
        BalanceCommand::new(cluster.clone(), fast_config()).with_cancellation(cancel.clone());
    let options = BalanceOptions {
        move_mode: MoveMode::Async,
        ..forced("t1", "rr")
    };

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    // Both moves were sent before the cancel, so nothing is left unresolved
    let BalanceOutcome::Applied(report) = command.run(&options).await.unwrap() else {
        panic!("expected applied moves");
    };
    assert_eq!(report.succeeded(), 2);
    assert_eq!(cluster.regions_on(&table("t1"), &server("rs2")), 2);
}

#[tokio::test]
async fn test_sandbox_topology_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cluster.json");
    std::fs::write(
        &path,
        r#"{
            "servers": ["rs1,16020,1", "rs2,16020,1"],
            "regions": [
                {"table": "t1", "start_key": "", "end_key": "m", "region_id": 1, "server": "rs1,16020,1"},
                {"table": "t1", "start_key": "m", "end_key": "", "region_id": 1, "server": "rs1,16020,1"}
            ]
        }"#,
    )
    .unwrap();

    let endpoint = ClusterEndpoint::parse(&format!("file://{}", path.display())).unwrap();
    assert!(endpoint.is_sandbox());
    let admin = endpoint.connect().unwrap();
    let command = BalanceCommand::new(admin, fast_config());

    let options = BalanceOptions {
        dry_run: true,
        ..forced("t1", "rr")
    };
    let BalanceOutcome::DryRun(placement) = command.run(&options).await.unwrap() else {
        panic!("expected a dry run");
    };
    assert_eq!(placement.regions_considered(), 2);
    assert!((placement.estimated_fraction() - 0.5).abs() < f64::EPSILON);

    let missing = ClusterEndpoint::parse(&format!("{}/nope.json", dir.path().display())).unwrap();
    assert!(missing.connect().is_err());
}
