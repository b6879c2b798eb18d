//! KvCluster controller.
//!
//! Reconciles KvCluster resources by observing member pods and invoking the
//! replication engine operation the topology calls for.

use super::{ControllerContext, ReconcileAction};
use crate::crd::{ClusterPhase, KvCluster, KvClusterSpec, KvClusterStatus};
use crate::engine::ReplicationEngine;
use crate::error::{OperatorError, OperatorResult};
use crate::topology::{ClusterRef, Node, Role, TransitionKind, elect_failover, find_master};
use kube::ResourceExt;
use std::sync::Arc;

/// Engine operation chosen for one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// No ready node yet.
    WaitForNodes,
    /// No master: bootstrap replication.
    Initialize,
    /// Make the named node master and repoint everyone else.
    Promote(String),
    /// Attach these ready nodes to the existing master.
    Attach(Vec<String>),
    /// Topology already converged; only the phase lags.
    MarkReady,
    /// Nothing to do.
    Steady,
}

/// Decide what a cluster needs from its status and observed nodes.
///
/// 1. An interrupted transition is resumed first, unless a different ready
///    master already stands
/// 2. Several ready nodes labeled master are collapsed onto the published
///    master by re-running its promotion
/// 3. With one ready master, unattached ready nodes are attached
/// 4. Without one, a previously ready cluster fails over and any other
///    cluster is bootstrapped
pub fn plan(status: &KvClusterStatus, nodes: &[Node]) -> ReconcilePlan {
    if !nodes.iter().any(|n| n.ready) {
        return ReconcilePlan::WaitForNodes;
    }

    let master = current_master(status, nodes);

    if status.phase == ClusterPhase::ConfiguringReplication {
        if let Some(record) = &status.transition {
            let target_ready = nodes.iter().any(|n| n.name == record.target && n.ready);
            let unopposed = master.is_none_or(|m| m.name == record.target);
            match record.kind {
                TransitionKind::Bootstrap if unopposed => return ReconcilePlan::Initialize,
                TransitionKind::Promotion if target_ready => {
                    return ReconcilePlan::Promote(record.target.clone());
                }
                _ => {}
            }
        }
    }

    match master {
        Some(master) => {
            let masters = nodes.iter().filter(|n| n.ready && n.role == Role::Master).count();
            if masters > 1 {
                return ReconcilePlan::Promote(master.name.clone());
            }

            let stragglers: Vec<String> = nodes
                .iter()
                .filter(|n| n.ready && n.name != master.name && n.role != Role::Replica)
                .map(|n| n.name.clone())
                .collect();

            if !stragglers.is_empty() {
                ReconcilePlan::Attach(stragglers)
            } else if status.phase != ClusterPhase::Ready {
                ReconcilePlan::MarkReady
            } else {
                ReconcilePlan::Steady
            }
        }
        None if status.phase == ClusterPhase::Ready => elect_failover(nodes)
            .map(|n| ReconcilePlan::Promote(n.name.clone()))
            .unwrap_or(ReconcilePlan::WaitForNodes),
        None => ReconcilePlan::Initialize,
    }
}

/// The ready master the cluster should keep.
///
/// The master published in the status wins over other master labels, which
/// may be left on a node that was unready during a failover.
fn current_master<'n>(status: &KvClusterStatus, nodes: &'n [Node]) -> Option<&'n Node> {
    status
        .master
        .as_deref()
        .and_then(|name| {
            nodes
                .iter()
                .find(|n| n.name == name && n.ready && n.role == Role::Master)
        })
        .or_else(|| find_master(nodes))
}

/// Controller for KvCluster resources.
#[derive(Clone)]
pub struct ClusterController {
    ctx: Arc<ControllerContext>,
}

impl ClusterController {
    /// Create a new cluster controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile a KvCluster resource.
    ///
    /// Holds the cluster's lease for the whole pass so no other reconciliation
    /// of the same cluster interleaves with it.
    pub async fn reconcile(&self, cluster: Arc<KvCluster>) -> OperatorResult<ReconcileAction> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("KvCluster must be namespaced".into()))?;
        self.validate_spec(&cluster.spec)?;

        let mut status = cluster.status.clone().unwrap_or_default();
        tracing::info!(
            name = %name,
            namespace = %namespace,
            replicas = cluster.spec.replicas,
            phase = %status.phase,
            "Reconciling KvCluster"
        );

        let cluster_ref = ClusterRef::new(name, namespace);
        let lease = self.ctx.leases.acquire(&cluster_ref).await;
        let engine = ReplicationEngine::new(
            cluster_ref.clone(),
            self.ctx.collaborators.clone(),
            self.admin_port(&cluster.spec),
        );

        let nodes = self
            .ctx
            .collaborators
            .directory
            .list_nodes(&cluster_ref)
            .await?;

        // The watched object may predate the last record update.
        status.transition = self.ctx.collaborators.phases.transition(&cluster_ref).await?;

        let next = plan(&status, &nodes);
        tracing::debug!(cluster = %cluster_ref, plan = ?next, "Planned reconciliation");

        match next {
            ReconcilePlan::WaitForNodes => {
                tracing::info!(cluster = %cluster_ref, "Waiting for nodes to be ready");
                Ok(ReconcileAction::requeue_short())
            }
            ReconcilePlan::Initialize => {
                engine.init_replication(&lease).await?;
                Ok(ReconcileAction::requeue_long())
            }
            ReconcilePlan::Promote(target) => {
                tracing::warn!(cluster = %cluster_ref, node = %target, "Converging on master");
                engine.configure_master(&lease, &target).await?;
                Ok(ReconcileAction::requeue_long())
            }
            ReconcilePlan::Attach(stragglers) => {
                for node in &stragglers {
                    engine.configure_replica(&lease, node).await?;
                }
                Ok(ReconcileAction::requeue_long())
            }
            ReconcilePlan::MarkReady => {
                self.ctx
                    .collaborators
                    .phases
                    .set_phase(&cluster_ref, ClusterPhase::Ready)
                    .await?;
                Ok(ReconcileAction::requeue_long())
            }
            ReconcilePlan::Steady => Ok(ReconcileAction::requeue_long()),
        }
    }

    fn admin_port(&self, spec: &KvClusterSpec) -> u16 {
        spec.admin_port.unwrap_or(self.ctx.config.admin_port)
    }

    /// Validate the cluster spec.
    fn validate_spec(&self, spec: &KvClusterSpec) -> OperatorResult<()> {
        if spec.replicas < 1 {
            return Err(OperatorError::InvalidConfig(
                "Replicas must be at least 1".into(),
            ));
        }

        if spec.admin_port == Some(0) {
            return Err(OperatorError::InvalidConfig(
                "Admin port must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// Handle errors during reconciliation.
pub fn error_policy(
    cluster: Arc<KvCluster>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(cluster = %cluster.name_any(), error = %error, "Reconciliation error");
    kube::runtime::controller::Action::requeue(ctx.config.error_requeue())
}
