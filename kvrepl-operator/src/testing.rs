//! In-memory collaborators for exercising the engine without a cluster.
//!
//! [`MockCluster`] serves both the directory and the role store, so labels
//! written by the engine are visible on the next listing, as with pods.
//!
//! # Example
//!
//! ```
//! use kvrepl_operator::testing::MockCluster;
//! use kvrepl_operator::{Node, Role};
//!
//! let cluster = MockCluster::new()
//!     .with_node(Node::new("n1").with_address("10.0.0.1").with_ready(true))
//!     .with_node(Node::new("n2").with_address("10.0.0.2").with_ready(true));
//!
//! assert_eq!(cluster.role_of("n1"), Role::Unknown);
//! ```

use crate::command::{ACK, NodeCommandClient, check_ack};
use crate::crd::ClusterPhase;
use crate::directory::NodeDirectory;
use crate::engine::Collaborators;
use crate::error::{OperatorError, OperatorFuture};
use crate::store::{PhaseTracker, RoleStore};
use crate::topology::{ClusterRef, Node, Role, TransitionRecord};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Observed node set plus the role labels written to it.
#[derive(Debug, Default)]
pub struct MockCluster {
    nodes: RwLock<Vec<Node>>,
    role_writes: RwLock<Vec<(String, Role)>>,
    failing_labels: RwLock<HashSet<String>>,
    failing_listing: RwLock<bool>,
}

impl MockCluster {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; listing order follows insertion order.
    pub fn with_node(self, node: Node) -> Self {
        self.nodes.write().push(node);
        self
    }

    /// Current view of a node.
    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.read().iter().find(|n| n.name == name).cloned()
    }

    /// Current role label of a node.
    pub fn role_of(&self, name: &str) -> Role {
        self.node(name).map(|n| n.role).unwrap_or_default()
    }

    /// Every label write in order.
    pub fn role_writes(&self) -> Vec<(String, Role)> {
        self.role_writes.read().clone()
    }

    /// Change a node's readiness.
    pub fn set_ready(&self, name: &str, ready: bool) {
        if let Some(node) = self.nodes.write().iter_mut().find(|n| n.name == name) {
            node.ready = ready;
        }
    }

    /// Make label writes for the node fail.
    pub fn fail_labels_for(&self, name: &str) {
        self.failing_labels.write().insert(name.to_string());
    }

    /// Make every listing fail.
    pub fn fail_listing(&self, fail: bool) {
        *self.failing_listing.write() = fail;
    }
}

impl NodeDirectory for MockCluster {
    fn list_nodes<'a>(&'a self, cluster: &'a ClusterRef) -> OperatorFuture<'a, Vec<Node>> {
        Box::pin(async move {
            if *self.failing_listing.read() {
                return Err(OperatorError::Lookup(format!("listing {} failed", cluster)));
            }
            Ok(self.nodes.read().clone())
        })
    }
}

impl RoleStore for MockCluster {
    fn set_role<'a>(
        &'a self,
        _cluster: &'a ClusterRef,
        node: &'a str,
        role: Role,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            if self.failing_labels.read().contains(node) {
                return Err(OperatorError::Store(format!("labeling {} failed", node)));
            }

            let mut nodes = self.nodes.write();
            let entry = nodes
                .iter_mut()
                .find(|n| n.name == node)
                .ok_or_else(|| OperatorError::Store(format!("node {} does not exist", node)))?;
            entry.role = role;
            self.role_writes.write().push((node.to_string(), role));
            Ok(())
        })
    }
}

/// A directive received by [`MockCommands`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `become master` sent to `node`.
    BecomeMaster {
        /// Node address.
        node: String,
    },
    /// `attach to master` sent to `node`.
    AttachTo {
        /// Node address.
        node: String,
        /// Master address.
        master: String,
    },
}

impl Directive {
    /// Address the directive was sent to.
    pub fn node(&self) -> &str {
        match self {
            Directive::BecomeMaster { node } | Directive::AttachTo { node, .. } => node,
        }
    }
}

/// How a node answers a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Connection fails before any reply.
    Unreachable,
    /// Node replies with this value instead of the acknowledgement.
    Reply(String),
}

/// Records directives and answers them per node address.
#[derive(Debug, Default)]
pub struct MockCommands {
    sent: RwLock<Vec<Directive>>,
    replies: RwLock<HashMap<String, MockReply>>,
}

impl MockCommands {
    /// Create a client that acknowledges everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer directives to `node_address` with `reply`.
    pub fn reply_with(&self, node_address: &str, reply: MockReply) {
        self.replies.write().insert(node_address.to_string(), reply);
    }

    /// Acknowledge directives to `node_address` again.
    pub fn heal(&self, node_address: &str) {
        self.replies.write().remove(node_address);
    }

    /// Directives received, including rejected ones.
    pub fn sent(&self) -> Vec<Directive> {
        self.sent.read().clone()
    }

    /// Forget recorded directives.
    pub fn clear(&self) {
        self.sent.write().clear();
    }

    fn answer(&self, directive: Directive, name: &str) -> Result<(), OperatorError> {
        let address = directive.node().to_string();
        self.sent.write().push(directive);

        match self.replies.read().get(&address) {
            None => check_ack(&address, name, ACK),
            Some(MockReply::Reply(value)) => check_ack(&address, name, value),
            Some(MockReply::Unreachable) => Err(OperatorError::command(address, "connection refused")),
        }
    }
}

impl NodeCommandClient for MockCommands {
    fn become_master<'a>(&'a self, node_address: &'a str) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            self.answer(
                Directive::BecomeMaster {
                    node: node_address.to_string(),
                },
                "SLAVEOF NO ONE",
            )
        })
    }

    fn attach_to<'a>(
        &'a self,
        node_address: &'a str,
        master_address: &'a str,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            self.answer(
                Directive::AttachTo {
                    node: node_address.to_string(),
                    master: master_address.to_string(),
                },
                "SLAVEOF",
            )
        })
    }
}

/// Phase and transition record of a single cluster.
#[derive(Debug, Default)]
pub struct MockPhaseTracker {
    phases: RwLock<Vec<ClusterPhase>>,
    transition: RwLock<Option<TransitionRecord>>,
    failing_phase: RwLock<Option<ClusterPhase>>,
}

impl MockPhaseTracker {
    /// Create a tracker in the `Creating` phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn phase(&self) -> ClusterPhase {
        self.phases.read().last().copied().unwrap_or_default()
    }

    /// Every phase written, in order.
    pub fn history(&self) -> Vec<ClusterPhase> {
        self.phases.read().clone()
    }

    /// Persisted transition record.
    pub fn current_transition(&self) -> Option<TransitionRecord> {
        self.transition.read().clone()
    }

    /// Make writes of `phase` fail.
    pub fn fail_phase(&self, phase: ClusterPhase) {
        *self.failing_phase.write() = Some(phase);
    }
}

impl PhaseTracker for MockPhaseTracker {
    fn set_phase<'a>(
        &'a self,
        cluster: &'a ClusterRef,
        phase: ClusterPhase,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            if *self.failing_phase.read() == Some(phase) {
                return Err(OperatorError::Store(format!(
                    "setting {} on {} failed",
                    phase, cluster
                )));
            }
            self.phases.write().push(phase);
            Ok(())
        })
    }

    fn transition<'a>(
        &'a self,
        _cluster: &'a ClusterRef,
    ) -> OperatorFuture<'a, Option<TransitionRecord>> {
        Box::pin(async move { Ok(self.transition.read().clone()) })
    }

    fn save_transition<'a>(
        &'a self,
        _cluster: &'a ClusterRef,
        record: Option<&'a TransitionRecord>,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            *self.transition.write() = record.cloned();
            Ok(())
        })
    }
}

/// Handles to every mock behind a [`Collaborators`] set.
#[derive(Clone)]
pub struct MockHarness {
    /// Nodes and labels.
    pub cluster: Arc<MockCluster>,
    /// Directive recorder.
    pub commands: Arc<MockCommands>,
    /// Phase recorder.
    pub phases: Arc<MockPhaseTracker>,
}

impl MockHarness {
    /// Wrap an existing mock cluster with fresh command and phase mocks.
    pub fn new(cluster: MockCluster) -> Self {
        Self {
            cluster: Arc::new(cluster),
            commands: Arc::new(MockCommands::new()),
            phases: Arc::new(MockPhaseTracker::new()),
        }
    }

    /// Collaborators backed by these mocks.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            directory: self.cluster.clone(),
            commands: self.commands.clone(),
            roles: self.cluster.clone(),
            phases: self.phases.clone(),
        }
    }
}
