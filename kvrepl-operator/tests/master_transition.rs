//! Master promotion and failover tests.

mod common;

use common::{TestCluster, addr, cluster_ref, ready_node};
use kvrepl_operator::testing::{Directive, MockCluster, MockReply};
use kvrepl_operator::topology::TransitionKind;
use kvrepl_operator::{ClusterPhase, Node, OperatorError, Role};

fn established() -> MockCluster {
    MockCluster::new()
        .with_node(ready_node(1, Role::Master))
        .with_node(ready_node(2, Role::Replica))
        .with_node(ready_node(3, Role::Replica))
}

/// Losing the master promotes the chosen replica and repoints the rest.
#[tokio::test]
async fn test_failover_to_replica() {
    let cluster = established();
    cluster.set_ready("n1", false);
    let test = TestCluster::new(cluster);
    let lease = test.leases.acquire(&cluster_ref()).await;

    test.engine.configure_master(&lease, "n2").await.expect("failover failed");

    assert_eq!(
        test.mocks.commands.sent(),
        vec![
            Directive::BecomeMaster { node: addr(2) },
            Directive::AttachTo { node: addr(3), master: addr(2) },
        ]
    );
    assert_eq!(test.mocks.cluster.role_of("n2"), Role::Master);
    assert_eq!(test.mocks.cluster.role_of("n3"), Role::Replica);
    assert_eq!(
        test.mocks.phases.history(),
        vec![ClusterPhase::ConfiguringReplication, ClusterPhase::Ready]
    );
}

/// Switching masters demotes the previous one.
#[tokio::test]
async fn test_switch_master() {
    let test = TestCluster::new(established());
    let lease = test.leases.acquire(&cluster_ref()).await;

    test.engine.configure_master(&lease, "n3").await.unwrap();

    assert_eq!(
        test.mocks.commands.sent(),
        vec![
            Directive::BecomeMaster { node: addr(3) },
            Directive::AttachTo { node: addr(1), master: addr(3) },
            Directive::AttachTo { node: addr(2), master: addr(3) },
        ]
    );
    assert_eq!(test.roles(3), vec![Role::Replica, Role::Replica, Role::Master]);
    assert_eq!(
        test.mocks.cluster.role_writes(),
        vec![("n3".to_string(), Role::Master), ("n1".to_string(), Role::Replica)]
    );
}

/// Reapplying the current topology resends directives but writes no labels.
#[tokio::test]
async fn test_converged_topology_writes_no_labels() {
    let test = TestCluster::new(established());
    let lease = test.leases.acquire(&cluster_ref()).await;

    test.engine.configure_master(&lease, "n1").await.unwrap();

    assert_eq!(test.mocks.commands.sent().len(), 3);
    assert!(test.mocks.cluster.role_writes().is_empty());
    assert_eq!(test.mocks.phases.phase(), ClusterPhase::Ready);
}

/// A failure mid-pass keeps the labels already written; nothing is rolled back.
#[tokio::test]
async fn test_promotion_partial_failure() {
    let test = TestCluster::new(established());
    test.mocks.commands.reply_with(&addr(1), MockReply::Unreachable);
    let lease = test.leases.acquire(&cluster_ref()).await;

    let err = test.engine.configure_master(&lease, "n3").await.unwrap_err();

    assert!(matches!(err, OperatorError::Command { .. }));
    assert_eq!(test.roles(3), vec![Role::Master, Role::Replica, Role::Master]);
    assert_eq!(test.mocks.phases.phase(), ClusterPhase::ConfiguringReplication);

    let record = test.mocks.phases.current_transition().expect("record kept");
    assert_eq!(record.kind, TransitionKind::Promotion);
    assert_eq!(record.target, "n3");
    assert_eq!(record.pending().collect::<Vec<_>>(), vec!["n1", "n2"]);
}

/// Retrying the same promotion only sends what was missing.
#[tokio::test]
async fn test_promotion_resumes() {
    let test = TestCluster::new(established());
    test.mocks.commands.reply_with(&addr(1), MockReply::Unreachable);
    let lease = test.leases.acquire(&cluster_ref()).await;
    assert!(test.engine.configure_master(&lease, "n3").await.is_err());

    test.mocks.commands.heal(&addr(1));
    test.mocks.commands.clear();
    test.engine.configure_master(&lease, "n3").await.unwrap();

    assert_eq!(
        test.mocks.commands.sent(),
        vec![
            Directive::AttachTo { node: addr(1), master: addr(3) },
            Directive::AttachTo { node: addr(2), master: addr(3) },
        ]
    );
    assert_eq!(test.roles(3), vec![Role::Replica, Role::Replica, Role::Master]);
    assert_eq!(test.mocks.phases.phase(), ClusterPhase::Ready);
    assert!(test.mocks.phases.current_transition().is_none());
}

/// Choosing a different target discards the unfinished record.
#[tokio::test]
async fn test_new_target_discards_stale_record() {
    let test = TestCluster::new(established());
    test.mocks.commands.reply_with(&addr(1), MockReply::Unreachable);
    let lease = test.leases.acquire(&cluster_ref()).await;
    assert!(test.engine.configure_master(&lease, "n3").await.is_err());

    test.mocks.commands.heal(&addr(1));
    test.mocks.commands.clear();
    test.engine.configure_master(&lease, "n2").await.unwrap();

    assert_eq!(
        test.mocks.commands.sent()[0],
        Directive::BecomeMaster { node: addr(2) }
    );
    assert_eq!(test.roles(3), vec![Role::Replica, Role::Master, Role::Replica]);
}

/// An unready target is refused before any directive.
#[tokio::test]
async fn test_unready_target() {
    let cluster = established();
    cluster.set_ready("n2", false);
    let test = TestCluster::new(cluster);
    let lease = test.leases.acquire(&cluster_ref()).await;

    let err = test.engine.configure_master(&lease, "n2").await.unwrap_err();

    assert!(matches!(err, OperatorError::Lookup(_)));
    assert!(test.mocks.commands.sent().is_empty());
    assert!(test.mocks.cluster.role_writes().is_empty());
}

/// An unknown target is a lookup error.
#[tokio::test]
async fn test_unknown_target() {
    let test = TestCluster::new(established());
    let lease = test.leases.acquire(&cluster_ref()).await;

    let err = test.engine.configure_master(&lease, "n9").await.unwrap_err();

    assert!(matches!(err, OperatorError::Lookup(_)));
    assert!(test.mocks.commands.sent().is_empty());
}

/// A ready target without an address cannot be commanded.
#[tokio::test]
async fn test_target_without_address() {
    let cluster = established().with_node(Node::new("n4").with_ready(true));
    let test = TestCluster::new(cluster);
    let lease = test.leases.acquire(&cluster_ref()).await;

    let err = test.engine.configure_master(&lease, "n4").await.unwrap_err();

    assert!(matches!(err, OperatorError::Lookup(_)));
    assert!(test.mocks.commands.sent().is_empty());
}

/// A phase write failure aborts after the topology converged.
#[tokio::test]
async fn test_ready_phase_failure() {
    let test = TestCluster::new(established());
    test.mocks.phases.fail_phase(ClusterPhase::Ready);
    let lease = test.leases.acquire(&cluster_ref()).await;

    let err = test.engine.configure_master(&lease, "n2").await.unwrap_err();

    assert!(matches!(err, OperatorError::Store(_)));
    assert_eq!(test.roles(3), vec![Role::Replica, Role::Master, Role::Replica]);
    assert_eq!(test.mocks.phases.phase(), ClusterPhase::ConfiguringReplication);
}
