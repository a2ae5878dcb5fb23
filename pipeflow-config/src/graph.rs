use crate::{block::ConfigBlock, Connection, Ident};
use anyhow::{ensure, Result};
use indexmap::IndexMap;
use itertools::chain;
use serde::{Deserialize, Serialize};
use serde_semver::SemverReq;

/// Edge capacity used when neither the connection nor the graph specify one.
pub const DEFAULT_EDGE_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, SemverReq)]
#[version("0.1.0")]
pub struct Version;

/// The serialized/deserialized pipeline graph configuration.
///
/// The configuration is valid if
/// - Process names are valid identifiers.
/// - Connection endpoints refer to declared processes.
/// - Each input port is the target of at most one connection.
/// - Edge capacities are at least 1.
///
/// The configuration consists of these components.
/// - `processes`: The process names, their plugin types and configurations.
/// - `connections`: Edges from output ports to input ports.
/// - `default_capacity`: The edge capacity used when a connection omits one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Format version
    pub version: Version,
    /// Default edge capacity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_capacity: Option<usize>,
    /// Process declarations.
    pub processes: IndexMap<Ident, ProcessConfig>,
    /// Edges between process ports.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// A process declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// The plugin name the process is created from.
    #[serde(rename = "type")]
    pub kind: String,
    /// The process configuration.
    #[serde(default)]
    pub config: ConfigBlock,
}

impl ProcessConfig {
    pub fn new(kind: impl Into<String>, config: ConfigBlock) -> Self {
        Self {
            kind: kind.into(),
            config,
        }
    }
}

impl GraphConfig {
    pub fn new() -> Self {
        Self {
            version: Version,
            default_capacity: None,
            processes: IndexMap::new(),
            connections: vec![],
        }
    }

    /// The capacity of an edge created for `conn`.
    pub fn capacity_of(&self, conn: &Connection) -> usize {
        conn.capacity
            .or(self.default_capacity)
            .unwrap_or(DEFAULT_EDGE_CAPACITY)
    }

    /// Check the structural validity of the graph.
    ///
    /// Port names are not checked here since they are only known once
    /// the processes are configured.
    pub fn validate(&self) -> Result<()> {
        // check if connection endpoints refer to declared processes
        self.connections
            .iter()
            .flat_map(|conn| chain!([&conn.from], [&conn.to]))
            .try_for_each(|addr| {
                ensure!(
                    self.processes.contains_key(addr.process()),
                    "'{}' is not a declared process",
                    addr.process()
                );
                Ok(())
            })?;

        // check that every input port is fed by at most one edge
        self.connections
            .iter()
            .enumerate()
            .try_for_each(|(index, conn)| {
                let duplicated = self.connections[..index]
                    .iter()
                    .any(|prev| prev.to == conn.to);
                ensure!(
                    !duplicated,
                    "input port '{}' is connected more than once",
                    conn.to
                );
                Ok(())
            })?;

        if let Some(capacity) = self.default_capacity {
            ensure!(capacity >= 1, "default edge capacity must be at least 1");
        }
        self.connections.iter().try_for_each(|conn| {
            ensure!(
                self.capacity_of(conn) >= 1,
                "edge '{}' -> '{}' must have capacity at least 1",
                conn.from,
                conn.to
            );
            Ok(())
        })?;

        Ok(())
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::new()
    }
}
