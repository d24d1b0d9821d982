//! Cluster identifiers
//!
//! Tables, region servers and regions as the master reports them. All of
//! these are observed, never mutated, by regionctl; the only thing the tool
//! changes is which server hosts a region.

use crate::error::{RegionCtlError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Namespace that is implied when a table name carries no prefix
pub const DEFAULT_NAMESPACE: &str = "default";

/// Separator between namespace and qualifier
pub const NAMESPACE_DELIMITER: char = ':';

/// Table name, optionally namespaced (`namespace:table`)
///
/// The default namespace is normalised away, so `default:t1` and `t1`
/// are the same table. Ordering is the lexicographic order of the
/// rendered name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    /// Parse a table name, validating namespace and qualifier
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        let (namespace, qualifier) = match name.split_once(NAMESPACE_DELIMITER) {
            Some((ns, q)) => (Some(ns), q),
            None => (None, name),
        };

        if qualifier.is_empty() || qualifier.contains(NAMESPACE_DELIMITER) {
            return Err(RegionCtlError::InvalidTableName(name.to_string()));
        }
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            || qualifier.starts_with(['.', '-'])
        {
            return Err(RegionCtlError::InvalidTableName(name.to_string()));
        }

        match namespace {
            None | Some(DEFAULT_NAMESPACE) => Ok(Self(qualifier.to_string())),
            Some(ns) if !ns.is_empty() && ns.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => {
                Ok(Self(format!("{}{}{}", ns, NAMESPACE_DELIMITER, qualifier)))
            }
            Some(_) => Err(RegionCtlError::InvalidTableName(name.to_string())),
        }
    }

    /// Namespace of the table (`default` when none was given)
    pub fn namespace(&self) -> &str {
        match self.0.split_once(NAMESPACE_DELIMITER) {
            Some((ns, _)) => ns,
            None => DEFAULT_NAMESPACE,
        }
    }

    /// Table name without its namespace
    pub fn qualifier(&self) -> &str {
        match self.0.split_once(NAMESPACE_DELIMITER) {
            Some((_, q)) => q,
            None => &self.0,
        }
    }

    /// Whether the table lives in the default namespace
    pub fn is_default_namespace(&self) -> bool {
        !self.0.contains(NAMESPACE_DELIMITER)
    }

    /// Rendered name, as the operator types it
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully qualified name, always including the namespace
    pub fn qualified(&self) -> String {
        format!("{}{}{}", self.namespace(), NAMESPACE_DELIMITER, self.qualifier())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableName({})", self.0)
    }
}

impl FromStr for TableName {
    type Err = RegionCtlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = RegionCtlError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

/// Region server identity: host, port and start code
///
/// Rendered in the master's canonical `host,port,startcode` form. A restarted
/// server gets a new start code and is therefore a different server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerName {
    host: String,
    port: u16,
    start_code: u64,
    /// Cached canonical form; equality, hashing and ordering use it
    id: String,
}

impl ServerName {
    /// Create a server name from its parts
    pub fn new(host: impl Into<String>, port: u16, start_code: u64) -> Self {
        let host = host.into();
        let id = format!("{},{},{}", host, port, start_code);
        Self {
            host,
            port,
            start_code,
            id,
        }
    }

    /// Parse `host,port,startcode` or `host:port`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || RegionCtlError::InvalidServerName(s.to_string());

        let parts: Vec<&str> = s.split(',').collect();
        match parts.as_slice() {
            [host, port, start_code] if !host.is_empty() => {
                let port = port.parse().map_err(|_| invalid())?;
                let start_code = start_code.parse().map_err(|_| invalid())?;
                Ok(Self::new(*host, port, start_code))
            }
            [host_port] => {
                let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
                if host.is_empty() {
                    return Err(invalid());
                }
                let port = port.parse().map_err(|_| invalid())?;
                Ok(Self::new(host, port, 0))
            }
            _ => Err(invalid()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn start_code(&self) -> u64 {
        self.start_code
    }

    /// Canonical identity string
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl PartialEq for ServerName {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServerName {}

impl Hash for ServerName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ServerName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl fmt::Debug for ServerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerName({})", self.id)
    }
}

impl FromStr for ServerName {
    type Err = RegionCtlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServerName {
    type Error = RegionCtlError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ServerName> for String {
    fn from(value: ServerName) -> Self {
        value.id
    }
}

/// One contiguous key range of one table
///
/// Ordered by table, then start key, then region id: this is the stable
/// "start-key order" the strategies iterate in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Owning table
    pub table: TableName,
    /// First row key (inclusive, empty for the first region)
    #[serde(default)]
    pub start_key: String,
    /// Region id (creation timestamp on the master)
    pub region_id: u64,
    /// Last row key (exclusive, empty for the last region)
    #[serde(default)]
    pub end_key: String,
    /// Short unique name used by the master's admin API
    #[serde(default)]
    pub encoded_name: String,
}

impl RegionInfo {
    /// Create a region, deriving its encoded name from table, start key and id
    pub fn new(
        table: TableName,
        start_key: impl Into<String>,
        end_key: impl Into<String>,
        region_id: u64,
    ) -> Self {
        let start_key = start_key.into();
        let encoded_name = Self::encode_name(&table, &start_key, region_id);
        Self {
            table,
            start_key,
            region_id,
            end_key: end_key.into(),
            encoded_name,
        }
    }

    /// Derive the 32-hex-character encoded name for a region
    pub fn encode_name(table: &TableName, start_key: &str, region_id: u64) -> String {
        let full = format!("{},{},{}", table.qualified(), start_key, region_id);
        let hash = blake3::hash(full.as_bytes());
        hash.to_hex()[..32].to_string()
    }

    /// Fill in the encoded name when it was left empty (hand-written topologies)
    pub fn with_derived_name(mut self) -> Self {
        if self.encoded_name.is_empty() {
            self.encoded_name = Self::encode_name(&self.table, &self.start_key, self.region_id);
        }
        self
    }
}

impl fmt::Display for RegionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.encoded_name)
    }
}

/// Load figures the master reports for one region server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerLoad {
    #[serde(default)]
    pub region_count: u32,
    #[serde(default)]
    pub store_file_size_mb: u64,
    #[serde(default)]
    pub memstore_size_mb: u64,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub max_heap_mb: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_default_namespace() {
        let plain = TableName::parse("usertable").unwrap();
        let explicit = TableName::parse("default:usertable").unwrap();
        assert_eq!(plain, explicit);
        assert_eq!(plain.namespace(), "default");
        assert_eq!(plain.qualified(), "default:usertable");
        assert!(plain.is_default_namespace());
    }

    #[test]
    fn test_table_name_namespaced() {
        let table = TableName::parse("ns1:orders").unwrap();
        assert_eq!(table.namespace(), "ns1");
        assert_eq!(table.qualifier(), "orders");
        assert_eq!(table.to_string(), "ns1:orders");
    }

    #[test]
    fn test_table_name_invalid() {
        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("ns:").is_err());
        assert!(TableName::parse("a:b:c").is_err());
        assert!(TableName::parse("bad name").is_err());
        assert!(TableName::parse(".hidden").is_err());
    }

    #[test]
    fn test_server_name_parse_canonical() {
        let server = ServerName::parse("rs1.example.com,16020,1700000000000").unwrap();
        assert_eq!(server.host(), "rs1.example.com");
        assert_eq!(server.port(), 16020);
        assert_eq!(server.start_code(), 1700000000000);
        assert_eq!(server.to_string(), "rs1.example.com,16020,1700000000000");
    }

    #[test]
    fn test_server_name_parse_host_port() {
        let server = ServerName::parse("rs2:16020").unwrap();
        assert_eq!(server, ServerName::new("rs2", 16020, 0));
        assert!(ServerName::parse("rs2").is_err());
        assert!(ServerName::parse("rs2,abc,1").is_err());
    }

    #[test]
    fn test_server_name_ordering_is_lexicographic() {
        let a = ServerName::new("rs10", 16020, 1);
        let b = ServerName::new("rs2", 16020, 1);
        // "rs10,..." < "rs2,..." as strings
        assert!(a < b);
    }

    #[test]
    fn test_region_order_follows_start_key() {
        let table = TableName::parse("t1").unwrap();
        let first = RegionInfo::new(table.clone(), "", "m", 1);
        let second = RegionInfo::new(table, "m", "", 2);
        assert!(first < second);
        assert_ne!(first.encoded_name, second.encoded_name);
        assert_eq!(first.encoded_name.len(), 32);
    }

    proptest::proptest! {
        #[test]
        fn prop_default_namespace_is_normalised(q in "[a-z][a-z0-9_]{0,15}") {
            let plain = TableName::parse(&q).unwrap();
            let explicit = TableName::parse(&format!("default:{}", q)).unwrap();
            proptest::prop_assert_eq!(&plain, &explicit);
            proptest::prop_assert_eq!(plain.as_str(), q.as_str());
        }
    }

    #[test]
    fn test_serde_round_trip_uses_strings() {
        let server = ServerName::new("rs1", 16020, 5);
        let json = serde_json::to_string(&server).unwrap();
        assert_eq!(json, "\"rs1,16020,5\"");

        let table: TableName = serde_json::from_str("\"ns:t\"").unwrap();
        assert_eq!(table.namespace(), "ns");
    }
}
