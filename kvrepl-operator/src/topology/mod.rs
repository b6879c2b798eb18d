//! Topology model and pure decisions over an observed node set.
//!
//! - [`Node`]: one observed cluster member with readiness and role
//! - [`resolver`]: master lookup and deterministic election
//! - [`transition`]: the resumable record of an in-flight topology change

pub mod resolver;
pub mod transition;

pub use resolver::{elect_failover, elect_master, find_master, master_address, master_exists};
pub use transition::{NodeProgress, TransitionKind, TransitionRecord};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label value for a node assigned the master role.
pub const MASTER_LABEL: &str = "master";

/// Label value for a node assigned the replica role.
pub const REPLICA_LABEL: &str = "replica";

/// Namespaced reference to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterRef {
    /// Cluster name.
    pub name: String,
    /// Cluster namespace.
    pub namespace: String,
}

impl ClusterRef {
    /// Create a new cluster reference.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Key identifying the cluster across namespaces (`namespace/name`).
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Last role assigned to a node by the engine.
///
/// This is a label on the node record, not the node's self-reported state, so
/// it may lag the live replication state after a partially applied command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Role {
    /// Authoritative write target.
    Master,
    /// Replicates from the master.
    Replica,
    /// No role label, or one this operator does not recognise.
    #[default]
    Unknown,
}

impl Role {
    /// Parse a role from its label value.
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            Some(MASTER_LABEL) => Role::Master,
            Some(REPLICA_LABEL) => Role::Replica,
            _ => Role::Unknown,
        }
    }

    /// Label value for this role, `None` for [`Role::Unknown`].
    pub fn as_label(&self) -> Option<&'static str> {
        match self {
            Role::Master => Some(MASTER_LABEL),
            Role::Replica => Some(REPLICA_LABEL),
            Role::Unknown => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label().unwrap_or("unknown"))
    }
}

/// One observed member of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Node identifier (pod name).
    pub name: String,
    /// Network host of the node, `None` until one is assigned.
    pub address: Option<String>,
    /// Whether the node passes its liveness and readiness signals.
    pub ready: bool,
    /// Last assigned role.
    pub role: Role,
}

impl Node {
    /// Create an unready, unlabeled node without an address.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            ready: false,
            role: Role::Unknown,
        }
    }

    /// Set the node's network host.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the readiness flag.
    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Set the role label.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Administrative address (`host:port`) of the node, if it has a host.
    pub fn admin_address(&self, port: u16) -> Option<String> {
        self.address.as_deref().map(|host| join_host_port(host, port))
    }
}

/// Join a host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Split a `host:port` address, removing IPv6 brackets from the host.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host, port))
}
