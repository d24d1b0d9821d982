//! Table set resolution
//!
//! Turns the comma-separated pattern argument into the concrete set of
//! tables to balance. Each pattern is a regular expression that must match
//! a whole table name; tables in the default namespace match either their
//! bare or their `default:`-qualified name.

use regex::Regex;
use regionctl_core::TableName;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cluster::{ClusterAdmin, ClusterError};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Table pattern list is empty")]
    EmptyPatternList,

    #[error("Invalid table pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Compiled table patterns
#[derive(Debug, Clone)]
pub struct TableSetResolver {
    raw: Vec<String>,
    compiled: Vec<Regex>,
}

impl TableSetResolver {
    /// Compile a comma-separated pattern list
    pub fn parse(patterns: &str) -> Result<Self, ResolveError> {
        let raw: Vec<String> = patterns
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        if raw.is_empty() {
            return Err(ResolveError::EmptyPatternList);
        }

        let compiled = raw
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p)).map_err(|source| ResolveError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { raw, compiled })
    }

    /// Patterns as given, trimmed
    pub fn patterns(&self) -> &[String] {
        &self.raw
    }

    /// Whether a table matches any pattern
    pub fn matches(&self, table: &TableName) -> bool {
        let qualified = table.is_default_namespace().then(|| table.qualified());
        self.compiled.iter().any(|re| {
            re.is_match(table.as_str())
                || qualified.as_deref().is_some_and(|q| re.is_match(q))
        })
    }

    /// Tables from `catalog` matching at least one pattern
    pub fn resolve<'a>(&self, catalog: impl IntoIterator<Item = &'a TableName>) -> BTreeSet<TableName> {
        catalog
            .into_iter()
            .filter(|t| self.matches(t))
            .cloned()
            .collect()
    }

    /// Resolve against the cluster's catalog
    #[instrument(skip(self, admin), fields(patterns = %self.raw.join(",")))]
    pub async fn resolve_from(&self, admin: &dyn ClusterAdmin) -> Result<BTreeSet<TableName>, ResolveError> {
        let catalog = admin.list_tables().await?;
        let resolved = self.resolve(&catalog);
        debug!(catalog = catalog.len(), resolved = resolved.len(), "Resolved table set");
        Ok(resolved)
    }
}
