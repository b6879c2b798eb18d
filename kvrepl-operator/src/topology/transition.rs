//! Resumable record of an in-flight topology change.
//!
//! The record is persisted next to the cluster phase. It pins the intended
//! master and tracks which nodes have already been switched, so a retried
//! reconciliation resumes where the failed one stopped instead of re-deriving
//! the target from labels alone.

use super::{Node, Role};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of change the record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TransitionKind {
    /// First topology for a cluster without a master.
    Bootstrap,
    /// Promotion of a chosen node, demoting every other node.
    Promotion,
}

/// Per-node progress of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NodeProgress {
    /// Directive not yet acknowledged.
    Pending,
    /// Directive acknowledged and role label written.
    Applied,
}

/// Intended target and per-node status of a topology change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// Kind of transition.
    pub kind: TransitionKind,

    /// Name of the node being made master.
    pub target: String,

    /// Administrative address replicas are pointed at.
    pub target_address: String,

    /// Progress of every node the transition touches.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeProgress>,

    /// When the transition started (RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl TransitionRecord {
    /// Start a transition towards `target`, with every ready node pending.
    pub fn new(
        kind: TransitionKind,
        target: &Node,
        target_address: impl Into<String>,
        nodes: &[Node],
    ) -> Self {
        let mut progress: BTreeMap<String, NodeProgress> = nodes
            .iter()
            .filter(|n| n.ready)
            .map(|n| (n.name.clone(), NodeProgress::Pending))
            .collect();
        progress.insert(target.name.clone(), NodeProgress::Pending);

        Self {
            kind,
            target: target.name.clone(),
            target_address: target_address.into(),
            nodes: progress,
            started_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Record that the node's directive and label both succeeded.
    pub fn mark_applied(&mut self, node: &str) {
        self.nodes.insert(node.to_string(), NodeProgress::Applied);
    }

    /// Whether the node was already switched by this transition.
    pub fn is_applied(&self, node: &str) -> bool {
        self.nodes.get(node) == Some(&NodeProgress::Applied)
    }

    /// Names of nodes still waiting for their directive.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .filter(|(_, p)| **p == NodeProgress::Pending)
            .map(|(name, _)| name.as_str())
    }

    /// Role this transition assigns to the node.
    pub fn desired_role(&self, node: &str) -> Role {
        if node == self.target {
            Role::Master
        } else {
            Role::Replica
        }
    }

    /// Whether the node can be skipped on resume: switched earlier and still
    /// carrying the label this transition gave it.
    pub fn already_converged(&self, node: &Node) -> bool {
        self.is_applied(&node.name) && node.role == self.desired_role(&node.name)
    }

    /// Whether a retried operation can pick this record up against the
    /// current observation: the target is still ready at the same address.
    pub fn is_resumable(&self, nodes: &[Node], port: u16) -> bool {
        nodes.iter().any(|n| {
            n.name == self.target
                && n.ready
                && n.admin_address(port).as_deref() == Some(self.target_address.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(name: &str, ip: &str) -> Node {
        Node::new(name).with_address(ip).with_ready(true)
    }

    fn nodes() -> Vec<Node> {
        vec![
            ready("n1", "10.0.0.1"),
            ready("n2", "10.0.0.2"),
            Node::new("n3").with_address("10.0.0.3"),
        ]
    }

    #[test]
    fn new_record_tracks_ready_nodes() {
        let nodes = nodes();
        let record =
            TransitionRecord::new(TransitionKind::Bootstrap, &nodes[0], "10.0.0.1:6379", &nodes);

        assert_eq!(record.target, "n1");
        assert_eq!(record.pending().collect::<Vec<_>>(), vec!["n1", "n2"]);
        assert!(!record.nodes.contains_key("n3"));
    }

    #[test]
    fn applied_nodes_leave_pending_set() {
        let nodes = nodes();
        let mut record =
            TransitionRecord::new(TransitionKind::Promotion, &nodes[1], "10.0.0.2:6379", &nodes);
        record.mark_applied("n2");

        assert!(record.is_applied("n2"));
        assert_eq!(record.pending().collect::<Vec<_>>(), vec!["n1"]);
    }

    #[test]
    fn converged_requires_matching_label() {
        let nodes = nodes();
        let mut record =
            TransitionRecord::new(TransitionKind::Bootstrap, &nodes[0], "10.0.0.1:6379", &nodes);
        record.mark_applied("n1");
        record.mark_applied("n2");

        assert!(record.already_converged(&nodes[0].clone().with_role(Role::Master)));
        assert!(!record.already_converged(&nodes[0]));
        assert!(record.already_converged(&nodes[1].clone().with_role(Role::Replica)));
    }

    #[test]
    fn resumable_only_while_target_keeps_its_address() {
        let mut nodes = nodes();
        let record =
            TransitionRecord::new(TransitionKind::Bootstrap, &nodes[0], "10.0.0.1:6379", &nodes);
        assert!(record.is_resumable(&nodes, 6379));

        nodes[0].address = Some("10.0.0.9".into());
        assert!(!record.is_resumable(&nodes, 6379));

        nodes[0].address = Some("10.0.0.1".into());
        nodes[0].ready = false;
        assert!(!record.is_resumable(&nodes, 6379));
    }

    #[test]
    fn record_serializes_camel_case() {
        let nodes = nodes();
        let record =
            TransitionRecord::new(TransitionKind::Bootstrap, &nodes[0], "10.0.0.1:6379", &nodes);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["targetAddress"], "10.0.0.1:6379");
        assert_eq!(json["kind"], "Bootstrap");
        assert_eq!(json["nodes"]["n2"], "Pending");
    }
}
