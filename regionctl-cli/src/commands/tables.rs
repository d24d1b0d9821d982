//! Tables Command
//!
//! Shows which tables a pattern list resolves to and how their regions are
//! spread over the live servers.

use crate::symbols;
use console::style;
use regionctl_balancer::{
    exit_code, BalanceError, ClusterEndpoint, ClusterSnapshot, TableSetResolver,
};

/// Tables configuration
pub struct TablesConfig {
    pub endpoint: String,
    pub patterns: String,
    /// Show per-server region counts
    pub verbose: bool,
}

/// Run tables command, returning the process exit code
pub async fn run(config: TablesConfig) -> u8 {
    match list(&config).await {
        Ok(()) => exit_code::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style(symbols::CROSS).red(), style(&e).red());
            e.exit_code()
        }
    }
}

async fn list(config: &TablesConfig) -> Result<(), BalanceError> {
    let endpoint = ClusterEndpoint::parse(&config.endpoint)?;
    let resolver = TableSetResolver::parse(&config.patterns)?;
    let admin = endpoint
        .connect()
        .map_err(BalanceError::ClusterUnavailable)?;

    let tables = resolver.resolve_from(admin.as_ref()).await?;
    if tables.is_empty() {
        println!(
            "{} No tables matched '{}'",
            style(symbols::WARN).yellow(),
            config.patterns
        );
        return Ok(());
    }

    let snapshot = ClusterSnapshot::capture(admin.as_ref(), &tables)
        .await
        .map_err(BalanceError::ClusterUnavailable)?;

    println!(
        "{}",
        style(format!("Tables matching '{}'", config.patterns))
            .bold()
            .underlined()
    );
    println!();
    println!(
        "  {:<32} {:>8} {:>8}",
        style("TABLE").bold(),
        style("REGIONS").bold(),
        style("SPREAD").bold()
    );
    for table in &tables {
        let counts = snapshot.server_counts(table);
        let regions = snapshot.regions_of(table).len();
        let spread = match (counts.values().max(), counts.values().min()) {
            (Some(max), Some(min)) => max - min,
            _ => 0,
        };
        println!("  {:<32} {:>8} {:>8}", table.to_string(), regions, spread);

        if config.verbose {
            for (server, count) in &counts {
                println!("      {:<40} {:>4}", style(server).dim(), count);
            }
            let offline = regions - counts.values().sum::<usize>();
            if offline > 0 {
                println!(
                    "      {} {} regions on servers outside the roster",
                    style(symbols::WARN).yellow(),
                    offline
                );
            }
        }
    }
    println!();
    println!(
        "{} {} tables, {} regions, {} live servers",
        style(symbols::INFO).cyan(),
        tables.len(),
        snapshot.region_count(),
        snapshot.roster().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_pattern_exit_code() {
        let code = run(TablesConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            patterns: "t1,[".to_string(),
            verbose: false,
        })
        .await;
        assert_eq!(code, exit_code::CONFIGURATION);
    }

    #[tokio::test]
    async fn test_lists_sandbox_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(
            &path,
            r#"{
                "servers": ["rs1,16020,1"],
                "tables": ["empty"],
                "regions": [
                    {"table": "t1", "region_id": 1, "server": "rs1,16020,1"}
                ]
            }"#,
        )
        .unwrap();

        let code = run(TablesConfig {
            endpoint: path.display().to_string(),
            patterns: ".*".to_string(),
            verbose: true,
        })
        .await;
        assert_eq!(code, exit_code::SUCCESS);
    }
}
