//! Node directory: the observed member set of a cluster.

use crate::error::{OperatorError, OperatorFuture};
use crate::topology::{ClusterRef, Node, Role};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

/// Label carrying the owning cluster's name.
pub const APP_LABEL: &str = "app";

/// Label grouping pods managed by this operator.
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";

/// Read-only view of a cluster's members.
///
/// No ordering is promised across calls.
pub trait NodeDirectory: Send + Sync {
    /// List the current members of the cluster.
    ///
    /// # Errors
    ///
    /// - `Lookup` if the query fails
    fn list_nodes<'a>(&'a self, cluster: &'a ClusterRef) -> OperatorFuture<'a, Vec<Node>>;
}

/// Directory backed by the cluster's pods.
#[derive(Clone)]
pub struct KubeNodeDirectory {
    client: Client,
    part_of: String,
    role_label: String,
}

impl KubeNodeDirectory {
    /// Create a directory selecting pods labeled `part-of=<part_of>`.
    pub fn new(client: Client, part_of: impl Into<String>, role_label: impl Into<String>) -> Self {
        Self {
            client,
            part_of: part_of.into(),
            role_label: role_label.into(),
        }
    }
}

impl NodeDirectory for KubeNodeDirectory {
    fn list_nodes<'a>(&'a self, cluster: &'a ClusterRef) -> OperatorFuture<'a, Vec<Node>> {
        Box::pin(async move {
            tracing::debug!(cluster = %cluster, "Listing cluster pods");
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &cluster.namespace);
            let selector = member_selector(&cluster.name, &self.part_of);

            let pod_list = pods
                .list(&ListParams::default().labels(&selector))
                .await
                .map_err(|e| OperatorError::Lookup(format!("listing pods of {}: {}", cluster, e)))?;

            Ok(pod_list
                .items
                .iter()
                .filter_map(|pod| node_from_pod(pod, &self.role_label))
                .collect())
        })
    }
}

/// Label selector matching a cluster's member pods.
pub fn member_selector(cluster: &str, part_of: &str) -> String {
    format!("{}={},{}={}", APP_LABEL, cluster, PART_OF_LABEL, part_of)
}

/// Convert a pod into a node.
///
/// A pod is ready when it is running, not being deleted, has an IP and its
/// first container reports ready. Pods without a name are skipped.
pub fn node_from_pod(pod: &Pod, role_label: &str) -> Option<Node> {
    let name = pod.metadata.name.clone()?;
    let status = pod.status.as_ref();

    let address = status.and_then(|s| s.pod_ip.clone()).filter(|ip| !ip.is_empty());
    let running = status.and_then(|s| s.phase.as_deref()) == Some("Running");
    let container_ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|containers| containers.first())
        .map(|c| c.ready)
        .unwrap_or(false);
    let terminating = pod.metadata.deletion_timestamp.is_some();

    let role = Role::from_label(
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(role_label))
            .map(String::as_str),
    );

    Some(Node {
        name,
        ready: running && container_ready && address.is_some() && !terminating,
        address,
        role,
    })
}
