//! KvCluster Custom Resource Definition.
//!
//! Describes a group of interchangeable nodes sharing one dataset. Pods are
//! created by external workload management; the operator only assigns roles
//! and reports replication progress in the status.

use crate::topology::TransitionRecord;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// KvCluster is the Schema for the kvclusters API.
///
/// Member pods are selected by `app=<name>` and
/// `app.kubernetes.io/part-of=<operator part-of value>`.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kvrepl.io",
    version = "v1",
    kind = "KvCluster",
    plural = "kvclusters",
    shortname = "kvc",
    namespaced,
    status = "KvClusterStatus",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.master"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KvClusterSpec {
    /// Desired number of nodes. Owned by workload management.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Administrative port of the nodes, overriding the operator default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_port: Option<u16>,
}

fn default_replicas() -> i32 {
    1
}

/// KvCluster status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KvClusterStatus {
    /// Current replication phase.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Name of the node last assigned the master role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// Transition in progress, kept until it completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionRecord>,

    /// Human-readable message about current state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the status was updated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Replication phase.
///
/// Advances to `Ready` only when a transition fully succeeds. A failed
/// operation leaves the phase where it was, normally `ConfiguringReplication`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ClusterPhase {
    /// Topology not yet established.
    #[default]
    Creating,
    /// A topology change is in progress or was interrupted.
    ConfiguringReplication,
    /// One master, every other ready node attached as replica.
    Ready,
}

impl ClusterPhase {
    /// Status message recorded alongside the phase.
    pub fn message(&self) -> &'static str {
        match self {
            ClusterPhase::Creating => "Waiting for nodes",
            ClusterPhase::ConfiguringReplication => "Configuring replication",
            ClusterPhase::Ready => "Replication configured",
        }
    }
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterPhase::Creating => "Creating",
            ClusterPhase::ConfiguringReplication => "ConfiguringReplication",
            ClusterPhase::Ready => "Ready",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_defaults() {
        let spec: KvClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.admin_port, None);
    }

    #[test]
    fn status_defaults_to_creating() {
        let status: KvClusterStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.phase, ClusterPhase::Creating);
        assert!(status.transition.is_none());
    }

    #[test]
    fn phase_serializes_by_name() {
        let status = KvClusterStatus {
            phase: ClusterPhase::ConfiguringReplication,
            master: Some("n1".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["phase"], "ConfiguringReplication");
        assert_eq!(json["master"], "n1");
        assert!(json.get("transition").is_none());
        assert_eq!(ClusterPhase::Ready.to_string(), "Ready");
    }

    #[test]
    fn crd_metadata() {
        let crd = KvCluster::crd();
        assert_eq!(crd.spec.group, "kvrepl.io");
        assert_eq!(crd.spec.names.kind, "KvCluster");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["kvc".to_string()])
        );
    }
}
