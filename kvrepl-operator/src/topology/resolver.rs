//! Master lookup and election over an observed node set.
//!
//! Directory listings carry no stable order, so every choice here is keyed on
//! the node name: the same topology always yields the same answer.

use super::{ClusterRef, Node, Role};
use crate::error::{OperatorError, OperatorResult};

/// Find the ready node labeled master.
///
/// If several ready nodes carry the master label the one with the smallest
/// name wins.
pub fn find_master(nodes: &[Node]) -> Option<&Node> {
    nodes
        .iter()
        .filter(|n| n.ready && n.role == Role::Master)
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Whether a ready, labeled master exists.
pub fn master_exists(nodes: &[Node]) -> bool {
    find_master(nodes).is_some()
}

/// Administrative address of the current master.
pub fn master_address(nodes: &[Node], cluster: &ClusterRef, port: u16) -> OperatorResult<String> {
    let master = find_master(nodes).ok_or_else(|| OperatorError::NoMasterFound {
        cluster: cluster.key(),
    })?;

    master.admin_address(port).ok_or_else(|| {
        OperatorError::Lookup(format!("master {} in {} has no address", master.name, cluster))
    })
}

/// Choose the master-elect for a bootstrap.
///
/// Nodes already labeled master are passed over so a stale label is never
/// re-selected.
pub fn elect_master(nodes: &[Node]) -> Option<&Node> {
    nodes
        .iter()
        .filter(|n| n.ready && n.role != Role::Master)
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Choose a replacement master after the previous one disappeared.
///
/// Nodes labeled replica hold a copy of the dataset and are preferred over
/// unlabeled ones.
pub fn elect_failover(nodes: &[Node]) -> Option<&Node> {
    nodes
        .iter()
        .filter(|n| n.ready)
        .min_by_key(|n| (n.role != Role::Replica, n.name.as_str()))
}
