//! Common test utilities for replication engine tests.

#![allow(dead_code)]

use kvrepl_operator::testing::{MockCluster, MockHarness};
use kvrepl_operator::{ClusterLeases, ClusterRef, Node, ReplicationEngine, Role};

/// Administrative port used by every test node.
pub const PORT: u16 = 6379;

/// Reference to the cluster under test.
pub fn cluster_ref() -> ClusterRef {
    ClusterRef::new("c1", "default")
}

/// A ready node at `10.0.0.<n>` with the given role.
pub fn ready_node(n: u8, role: Role) -> Node {
    Node::new(format!("n{}", n))
        .with_address(format!("10.0.0.{}", n))
        .with_ready(true)
        .with_role(role)
}

/// Administrative address of node `n`.
pub fn addr(n: u8) -> String {
    format!("10.0.0.{}:{}", n, PORT)
}

/// Cluster `c1` with three ready, unlabeled nodes `n1`..`n3`.
pub fn three_unlabeled() -> MockCluster {
    MockCluster::new()
        .with_node(ready_node(1, Role::Unknown))
        .with_node(ready_node(2, Role::Unknown))
        .with_node(ready_node(3, Role::Unknown))
}

/// Test context holding the mocks, the engine and the lease table.
pub struct TestCluster {
    /// Mock collaborators.
    pub mocks: MockHarness,
    /// Engine over the mocks.
    pub engine: ReplicationEngine,
    /// Lease table.
    pub leases: ClusterLeases,
}

impl TestCluster {
    /// Build a test context around the given node set.
    pub fn new(cluster: MockCluster) -> Self {
        let mocks = MockHarness::new(cluster);
        let engine = ReplicationEngine::new(cluster_ref(), mocks.collaborators(), PORT);
        Self {
            mocks,
            engine,
            leases: ClusterLeases::new(),
        }
    }

    /// Roles of `n1`..`n<count>` in order.
    pub fn roles(&self, count: u8) -> Vec<Role> {
        (1..=count)
            .map(|n| self.mocks.cluster.role_of(&format!("n{}", n)))
            .collect()
    }
}
