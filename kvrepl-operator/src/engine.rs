//! Replication engine: converges a cluster onto one master and N replicas.
//!
//! Three operations are exposed, chosen by the caller from the observed
//! cluster condition:
//!
//! - [`ReplicationEngine::init_replication`]: no master yet, bootstrap one
//! - [`ReplicationEngine::configure_master`]: promote a chosen node, demote the rest
//! - [`ReplicationEngine::configure_replica`]: attach one node to the existing master
//!
//! Nodes are commanded one at a time. Any error aborts the operation and is
//! returned unchanged. Nothing is rolled back: nodes switched before the
//! failure keep their new role, the phase stays `ConfiguringReplication` and
//! the persisted [`TransitionRecord`] lets the next call resume.
//!
//! # Example
//!
//! ```ignore
//! let engine = ReplicationEngine::new(cluster_ref.clone(), collaborators, 6379);
//! let lease = leases.acquire(&cluster_ref).await;
//! engine.init_replication(&lease).await?;
//! ```

use crate::command::NodeCommandClient;
use crate::crd::ClusterPhase;
use crate::directory::NodeDirectory;
use crate::error::{OperatorError, OperatorResult};
use crate::lease::ClusterLease;
use crate::store::{PhaseTracker, RoleStore};
use crate::topology::{
    ClusterRef, Node, Role, TransitionKind, TransitionRecord, elect_master, find_master,
    master_address,
};
use std::sync::Arc;

/// External collaborators the engine composes.
#[derive(Clone)]
pub struct Collaborators {
    /// Observed member set.
    pub directory: Arc<dyn NodeDirectory>,
    /// Administrative directives.
    pub commands: Arc<dyn NodeCommandClient>,
    /// Node role labels.
    pub roles: Arc<dyn RoleStore>,
    /// Cluster phase and transition record.
    pub phases: Arc<dyn PhaseTracker>,
}

/// Topology reconciliation for a single cluster.
pub struct ReplicationEngine {
    cluster: ClusterRef,
    deps: Collaborators,
    admin_port: u16,
}

impl ReplicationEngine {
    /// Create an engine for `cluster` whose nodes listen on `admin_port`.
    pub fn new(cluster: ClusterRef, deps: Collaborators, admin_port: u16) -> Self {
        Self {
            cluster,
            deps,
            admin_port,
        }
    }

    /// Cluster this engine reconciles.
    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    /// Bootstrap replication for a cluster without a master.
    ///
    /// Elects the ready node with the smallest name that is not already
    /// labeled master, promotes it and attaches every other ready node to it.
    /// An unfinished bootstrap whose target is still ready at the same
    /// address is resumed instead of re-electing.
    ///
    /// # Errors
    ///
    /// - `Lookup` if no ready node is eligible or the directory fails
    /// - `Command` / `Store` from the first failing step
    pub async fn init_replication(&self, lease: &ClusterLease) -> OperatorResult<()> {
        self.check_lease(lease)?;
        tracing::info!(cluster = %self.cluster, "Initializing replication");

        self.deps
            .phases
            .set_phase(&self.cluster, ClusterPhase::ConfiguringReplication)
            .await?;

        let nodes = self.deps.directory.list_nodes(&self.cluster).await?;
        let mut record = match self.resumable(TransitionKind::Bootstrap, None, &nodes).await? {
            Some(record) => record,
            None => {
                let elect = elect_master(&nodes).ok_or_else(|| {
                    OperatorError::Lookup(format!(
                        "no ready node eligible for master election in {}",
                        self.cluster
                    ))
                })?;
                tracing::info!(cluster = %self.cluster, node = %elect.name, "Elected master");
                TransitionRecord::new(
                    TransitionKind::Bootstrap,
                    elect,
                    self.address_of(elect)?,
                    &nodes,
                )
            }
        };

        self.converge(&nodes, &mut record).await?;
        self.finish().await
    }

    /// Promote `target` to master and attach every other ready node to it.
    ///
    /// The target is promoted before the others are repointed, so until the
    /// pass completes some replicas still follow the previous master.
    ///
    /// # Errors
    ///
    /// - `Lookup` if the target is unknown, unready or has no address
    /// - `Command` / `Store` from the first failing step
    pub async fn configure_master(&self, lease: &ClusterLease, target: &str) -> OperatorResult<()> {
        self.check_lease(lease)?;
        tracing::info!(cluster = %self.cluster, node = %target, "Configuring node as master");

        self.deps
            .phases
            .set_phase(&self.cluster, ClusterPhase::ConfiguringReplication)
            .await?;

        let nodes = self.deps.directory.list_nodes(&self.cluster).await?;
        let target_node = self.lookup(&nodes, target)?;
        if !target_node.ready {
            return Err(OperatorError::Lookup(format!(
                "node {} in {} is not ready",
                target, self.cluster
            )));
        }

        let mut record = match self
            .resumable(TransitionKind::Promotion, Some(target), &nodes)
            .await?
        {
            Some(record) => record,
            None => TransitionRecord::new(
                TransitionKind::Promotion,
                target_node,
                self.address_of(target_node)?,
                &nodes,
            ),
        };

        self.converge(&nodes, &mut record).await?;
        self.finish().await
    }

    /// Attach one node to the current master.
    ///
    /// Unready nodes are skipped without touching the phase. When the node is
    /// the master itself no directive is sent.
    ///
    /// # Errors
    ///
    /// - `NoMasterFound` if no ready master exists; nothing is sent or written
    /// - `Lookup` if the node is unknown
    /// - `Command` / `Store` from the attach or relabel
    pub async fn configure_replica(&self, lease: &ClusterLease, node: &str) -> OperatorResult<()> {
        self.check_lease(lease)?;
        tracing::info!(cluster = %self.cluster, node = %node, "Configuring node as replica");

        let nodes = self.deps.directory.list_nodes(&self.cluster).await?;
        let master_addr = master_address(&nodes, &self.cluster, self.admin_port)?;
        let master = find_master(&nodes).ok_or_else(|| OperatorError::NoMasterFound {
            cluster: self.cluster.key(),
        })?;

        let replica = self.lookup(&nodes, node)?;
        if !replica.ready {
            tracing::info!(cluster = %self.cluster, node = %node, "Node not ready, skipping");
            return Ok(());
        }

        if replica.name == master.name {
            tracing::debug!(cluster = %self.cluster, node = %node, "Node is the master, nothing to attach");
        } else {
            self.attach(replica, &master_addr).await?;
        }

        self.deps
            .phases
            .set_phase(&self.cluster, ClusterPhase::Ready)
            .await
    }

    /// Promote the record's target, then attach every other ready node.
    async fn converge(&self, nodes: &[Node], record: &mut TransitionRecord) -> OperatorResult<()> {
        self.deps
            .phases
            .save_transition(&self.cluster, Some(&*record))
            .await?;

        let target = self.lookup(nodes, &record.target)?;
        if record.already_converged(target) {
            tracing::debug!(cluster = %self.cluster, node = %target.name, "Master already promoted");
        } else {
            self.promote(target).await?;
            record.mark_applied(&target.name);
            self.deps
                .phases
                .save_transition(&self.cluster, Some(&*record))
                .await?;
        }

        let master = record.target.clone();
        tracing::info!(cluster = %self.cluster, master = %master, "Configuring other nodes as replicas");
        for node in nodes.iter().filter(|n| n.name != master) {
            if !node.ready {
                tracing::debug!(cluster = %self.cluster, node = %node.name, "Node not ready, skipping");
                continue;
            }
            if record.already_converged(node) {
                tracing::debug!(cluster = %self.cluster, node = %node.name, "Replica already attached");
                continue;
            }

            self.attach(node, &record.target_address).await?;
            record.mark_applied(&node.name);
            self.deps
                .phases
                .save_transition(&self.cluster, Some(&*record))
                .await?;
        }

        Ok(())
    }

    async fn promote(&self, node: &Node) -> OperatorResult<()> {
        let address = self.address_of(node)?;
        tracing::info!(cluster = %self.cluster, node = %node.name, address = %address, "Promoting node to master");
        self.deps.commands.become_master(&address).await?;
        self.relabel(node, Role::Master).await
    }

    async fn attach(&self, node: &Node, master_addr: &str) -> OperatorResult<()> {
        let address = self.address_of(node)?;
        tracing::info!(
            cluster = %self.cluster,
            node = %node.name,
            address = %address,
            master = %master_addr,
            "Attaching node to master"
        );
        self.deps.commands.attach_to(&address, master_addr).await?;
        self.relabel(node, Role::Replica).await
    }

    /// Write the role label unless the node already carries it.
    async fn relabel(&self, node: &Node, role: Role) -> OperatorResult<()> {
        if node.role == role {
            tracing::debug!(cluster = %self.cluster, node = %node.name, role = %role, "Role label already current");
            return Ok(());
        }
        self.deps.roles.set_role(&self.cluster, &node.name, role).await
    }

    async fn finish(&self) -> OperatorResult<()> {
        self.deps.phases.save_transition(&self.cluster, None).await?;
        self.deps
            .phases
            .set_phase(&self.cluster, ClusterPhase::Ready)
            .await?;
        tracing::info!(cluster = %self.cluster, "Replication configured");
        Ok(())
    }

    /// Load the persisted record if it matches this operation and can resume.
    async fn resumable(
        &self,
        kind: TransitionKind,
        target: Option<&str>,
        nodes: &[Node],
    ) -> OperatorResult<Option<TransitionRecord>> {
        let Some(record) = self.deps.phases.transition(&self.cluster).await? else {
            return Ok(None);
        };

        let matches = record.kind == kind
            && target.is_none_or(|t| t == record.target)
            && record.is_resumable(nodes, self.admin_port);

        if matches {
            tracing::info!(
                cluster = %self.cluster,
                target = %record.target,
                pending = record.pending().count(),
                "Resuming unfinished transition"
            );
            Ok(Some(record))
        } else {
            tracing::info!(cluster = %self.cluster, stale = %record.target, "Discarding stale transition");
            Ok(None)
        }
    }

    fn lookup<'n>(&self, nodes: &'n [Node], name: &str) -> OperatorResult<&'n Node> {
        nodes.iter().find(|n| n.name == name).ok_or_else(|| {
            OperatorError::Lookup(format!("node {} not found in {}", name, self.cluster))
        })
    }

    fn address_of(&self, node: &Node) -> OperatorResult<String> {
        node.admin_address(self.admin_port).ok_or_else(|| {
            OperatorError::Lookup(format!("node {} in {} has no address", node.name, self.cluster))
        })
    }

    fn check_lease(&self, lease: &ClusterLease) -> OperatorResult<()> {
        if lease.cluster() == &self.cluster {
            Ok(())
        } else {
            Err(OperatorError::LeaseMismatch {
                held: lease.cluster().key(),
                requested: self.cluster.key(),
            })
        }
    }
}
