//! Role store and phase tracker: where the engine persists its decisions.

use crate::crd::{ClusterPhase, KvCluster};
use crate::error::{OperatorError, OperatorFuture};
use crate::topology::{ClusterRef, Role, TransitionRecord};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

/// Persists the role assigned to a node.
pub trait RoleStore: Send + Sync {
    /// Record `role` on the node. [`Role::Unknown`] removes the label.
    ///
    /// # Errors
    ///
    /// - `Store` if the write fails
    fn set_role<'a>(&'a self, cluster: &'a ClusterRef, node: &'a str, role: Role)
    -> OperatorFuture<'a, ()>;
}

/// Persists the replication phase and the in-flight transition of a cluster.
pub trait PhaseTracker: Send + Sync {
    /// Record the cluster's phase.
    ///
    /// # Errors
    ///
    /// - `Store` if the write fails
    fn set_phase<'a>(&'a self, cluster: &'a ClusterRef, phase: ClusterPhase)
    -> OperatorFuture<'a, ()>;

    /// Load the transition left by an earlier, unfinished operation.
    ///
    /// # Errors
    ///
    /// - `Lookup` if the cluster record cannot be read
    fn transition<'a>(&'a self, cluster: &'a ClusterRef)
    -> OperatorFuture<'a, Option<TransitionRecord>>;

    /// Save the transition record, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// - `Store` if the write fails
    fn save_transition<'a>(
        &'a self,
        cluster: &'a ClusterRef,
        record: Option<&'a TransitionRecord>,
    ) -> OperatorFuture<'a, ()>;
}

/// Role store writing a label on the node's pod.
#[derive(Clone)]
pub struct KubeRoleStore {
    client: Client,
    role_label: String,
    field_manager: String,
}

impl KubeRoleStore {
    /// Create a role store writing the `role_label` pod label.
    pub fn new(client: Client, role_label: impl Into<String>, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            role_label: role_label.into(),
            field_manager: field_manager.into(),
        }
    }
}

impl RoleStore for KubeRoleStore {
    fn set_role<'a>(
        &'a self,
        cluster: &'a ClusterRef,
        node: &'a str,
        role: Role,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &cluster.namespace);
            let patch = role_label_patch(&self.role_label, role);

            pods.patch(node, &patch_params(&self.field_manager), &Patch::Merge(&patch))
                .await
                .map_err(|e| OperatorError::Store(format!("labeling {} as {}: {}", node, role, e)))?;

            tracing::info!(cluster = %cluster, node = %node, role = %role, "Updated node role label");
            Ok(())
        })
    }
}

/// Phase tracker writing the `KvCluster` status subresource.
#[derive(Clone)]
pub struct KubePhaseTracker {
    client: Client,
    field_manager: String,
}

impl KubePhaseTracker {
    /// Create a phase tracker for `KvCluster` resources.
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    async fn patch_status(&self, cluster: &ClusterRef, status: serde_json::Value) -> Result<(), OperatorError> {
        let api: Api<KvCluster> = Api::namespaced(self.client.clone(), &cluster.namespace);
        let patch = serde_json::json!({ "status": status });

        api.patch_status(&cluster.name, &patch_params(&self.field_manager), &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::Store(format!("updating status of {}: {}", cluster, e)))?;

        Ok(())
    }
}

impl PhaseTracker for KubePhaseTracker {
    fn set_phase<'a>(
        &'a self,
        cluster: &'a ClusterRef,
        phase: ClusterPhase,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(cluster = %cluster, phase = %phase, "Updating status");
            self.patch_status(cluster, phase_patch(phase)).await
        })
    }

    fn transition<'a>(
        &'a self,
        cluster: &'a ClusterRef,
    ) -> OperatorFuture<'a, Option<TransitionRecord>> {
        Box::pin(async move {
            let api: Api<KvCluster> = Api::namespaced(self.client.clone(), &cluster.namespace);
            let current = api
                .get_status(&cluster.name)
                .await
                .map_err(|e| OperatorError::Lookup(format!("reading {}: {}", cluster, e)))?;

            Ok(current.status.and_then(|s| s.transition))
        })
    }

    fn save_transition<'a>(
        &'a self,
        cluster: &'a ClusterRef,
        record: Option<&'a TransitionRecord>,
    ) -> OperatorFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                cluster = %cluster,
                target = ?record.map(|r| r.target.as_str()),
                pending = record.map(|r| r.pending().count()).unwrap_or(0),
                "Saving transition record"
            );
            self.patch_status(cluster, transition_patch(record)).await
        })
    }
}

fn patch_params(field_manager: &str) -> PatchParams {
    PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    }
}

/// Merge patch setting (or, for [`Role::Unknown`], removing) the role label.
pub fn role_label_patch(role_label: &str, role: Role) -> serde_json::Value {
    let mut labels = serde_json::Map::new();
    labels.insert(
        role_label.to_string(),
        role.as_label()
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
    );
    serde_json::json!({ "metadata": { "labels": labels } })
}

/// Status fields written when the phase changes.
pub fn phase_patch(phase: ClusterPhase) -> serde_json::Value {
    serde_json::json!({
        "phase": phase,
        "message": phase.message(),
        "lastUpdated": chrono::Utc::now().to_rfc3339(),
    })
}

/// Status fields written when the transition record changes.
///
/// Saving a record also publishes its target as the cluster's master; a
/// `null` transition removes the field under merge-patch semantics.
pub fn transition_patch(record: Option<&TransitionRecord>) -> serde_json::Value {
    match record {
        Some(record) => serde_json::json!({
            "transition": record,
            "master": record.target,
            "lastUpdated": chrono::Utc::now().to_rfc3339(),
        }),
        None => serde_json::json!({
            "transition": serde_json::Value::Null,
            "lastUpdated": chrono::Utc::now().to_rfc3339(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Node, TransitionKind};

    #[test]
    fn role_patch_sets_label_value() {
        let patch = role_label_patch("role", Role::Replica);
        assert_eq!(patch["metadata"]["labels"]["role"], "replica");
    }

    #[test]
    fn unknown_role_removes_label() {
        let patch = role_label_patch("kvrepl.io/role", Role::Unknown);
        assert!(patch["metadata"]["labels"]["kvrepl.io/role"].is_null());
    }

    #[test]
    fn phase_patch_carries_message() {
        let patch = phase_patch(ClusterPhase::ConfiguringReplication);
        assert_eq!(patch["phase"], "ConfiguringReplication");
        assert_eq!(patch["message"], "Configuring replication");
    }

    #[test]
    fn transition_patch_publishes_target_as_master() {
        let nodes = vec![Node::new("n1").with_address("10.0.0.1").with_ready(true)];
        let record =
            TransitionRecord::new(TransitionKind::Bootstrap, &nodes[0], "10.0.0.1:6379", &nodes);

        let patch = transition_patch(Some(&record));
        assert_eq!(patch["master"], "n1");
        assert_eq!(patch["transition"]["target"], "n1");

        let cleared = transition_patch(None);
        assert!(cleared["transition"].is_null());
        assert!(cleared.get("master").is_none());
    }
}
