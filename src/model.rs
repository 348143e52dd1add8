//! Core domain types: the cluster/keyspace/table configuration tree,
//! token-range fragments, dispatched repairs and their callback payloads.
//!
//! Configuration types carry the YAML tags the config file uses; wire types
//! (Repair, RepairStatus) carry the JSON tags of the callback protocol.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Connection parameters of the repair agent that exposes token rings and
/// accepts repair commands on behalf of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub host: String,
    pub port: u16,
}

impl Connector {
    /// Base URL of the agent's HTTP API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// One cluster to repair: an ordered list of keyspaces plus the polling
/// interval between full repair cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    /// Human-readable cycle interval, e.g. "1w" or "12h".
    pub interval: String,
    pub keyspaces: Vec<KeyspaceConfig>,
}

impl ClusterConfig {
    /// Parse the cycle interval. Fails with a config error on garbage input.
    pub fn interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.interval).map_err(|e| {
            Error::Config(format!(
                "cluster {}: bad interval {:?}: {}",
                self.name, self.interval, e
            ))
        })
    }
}

/// Keyspace repair schedule description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyspaceConfig {
    pub name: String,
    /// Default number of slices each table's token range is split into.
    #[serde(default = "default_slices")]
    pub slices: u32,
    pub tables: Vec<TableConfig>,
}

/// Column family to repair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Approximate data size, used for operator-facing weighting only.
    #[serde(default)]
    pub size: i64,
    /// Per-table slice override; zero inherits the keyspace default.
    #[serde(default)]
    pub slices: u32,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_slices() -> u32 {
    100
}

fn default_weight() -> f32 {
    1.0
}

/// Composite arena key identifying one table's progress entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableKey {
    pub cluster: String,
    pub keyspace: String,
    pub table: String,
}

impl TableKey {
    pub fn new(
        cluster: impl Into<String>,
        keyspace: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.keyspace, self.table)
    }
}

/// A contiguous slice of a table's token range, owned by one endpoint.
///
/// Immutable once produced by the Obtainer; `position` preserves the
/// deterministic dispatch order within the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: u32,
    /// Back-references filled in by the Obtainer; agents only send the
    /// range itself.
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub keyspace: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub position: usize,
    pub endpoint: String,
    pub start: String,
    pub end: String,
}

impl Fragment {
    pub fn table_key(&self) -> TableKey {
        TableKey::new(&self.cluster, &self.keyspace, &self.table)
    }
}

/// One token of the ring as reported by the agent, with its owned ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub ranges: Vec<Fragment>,
}

/// One dispatched unit of repair work.
///
/// Created by the Scheduler at dispatch time; finalized by the callback
/// Server. `started` is process-local measurement state and never crosses
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repair {
    pub id: u64,
    pub cluster: String,
    pub keyspace: String,
    pub table: String,
    pub start: String,
    pub end: String,
    pub endpoint: String,
    /// Address the node reports completion back to.
    pub callback: String,
    #[serde(skip, default = "Instant::now")]
    pub started: Instant,
}

impl Repair {
    pub fn table_key(&self) -> TableKey {
        TableKey::new(&self.cluster, &self.keyspace, &self.table)
    }
}

/// Outcome class carried by a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Non-terminal progress report; never counted.
    Running,
    /// Repair finished successfully.
    #[serde(alias = "success")]
    Complete,
    /// Repair finished with an error on the node.
    Error,
}

impl StatusKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StatusKind::Running)
    }
}

/// Callback payload: echoes the repair, plus outcome class, free-text
/// message and the node's repair session identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairStatus {
    pub repair: Repair,
    #[serde(rename = "type")]
    pub kind: StatusKind,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub session: String,
}
