//! Kubernetes controller for kvrepl resources.
//!
//! - [`ClusterController`]: decides which replication operation a KvCluster
//!   needs and runs it under the cluster's lease
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use kvrepl_operator::controller::{ClusterController, cluster_error_policy};
//!
//! Controller::new(clusters, watcher_config)
//!     .run(|cluster, ctx| async move {
//!         let controller = ClusterController::new(ctx.clone());
//!         controller.reconcile(cluster).await
//!     }, cluster_error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod cluster;

pub use cluster::{ClusterController, ReconcilePlan, error_policy as cluster_error_policy, plan};

use crate::command::RedisCommandClient;
use crate::config::OperatorConfig;
use crate::directory::KubeNodeDirectory;
use crate::engine::Collaborators;
use crate::lease::ClusterLeases;
use crate::store::{KubePhaseTracker, KubeRoleStore};
use std::sync::Arc;

/// Shared context for controllers.
pub struct ControllerContext {
    /// Operator configuration.
    pub config: OperatorConfig,
    /// Engine collaborators.
    pub collaborators: Collaborators,
    /// Per-cluster leases.
    pub leases: ClusterLeases,
}

impl ControllerContext {
    /// Create a context backed by the Kubernetes API and the Redis protocol.
    pub fn new(client: kube::Client, config: OperatorConfig) -> Self {
        let collaborators = Collaborators {
            directory: Arc::new(KubeNodeDirectory::new(
                client.clone(),
                config.part_of.clone(),
                config.role_label.clone(),
            )),
            commands: Arc::new(RedisCommandClient::with_timeout(config.command_timeout())),
            roles: Arc::new(KubeRoleStore::new(
                client.clone(),
                config.role_label.clone(),
                config.field_manager.clone(),
            )),
            phases: Arc::new(KubePhaseTracker::new(client, config.field_manager.clone())),
        };

        Self::with_collaborators(config, collaborators)
    }

    /// Create a context over arbitrary collaborators.
    pub fn with_collaborators(config: OperatorConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            leases: ClusterLeases::new(),
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
}

impl ReconcileAction {
    /// Requeue after 5 seconds (waiting on nodes or an unfinished transition).
    pub fn requeue_short() -> Self {
        Self::Requeue(std::time::Duration::from_secs(5))
    }

    /// Requeue after 5 minutes (periodic drift check of a stable topology).
    pub fn requeue_long() -> Self {
        Self::Requeue(std::time::Duration::from_secs(300))
    }
}
