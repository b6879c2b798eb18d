//! Custom Resource Definitions for the kvrepl operator.
//!
//! - [`KvCluster`]: a replicated Redis-protocol cluster

mod cluster;

pub use cluster::{ClusterPhase, KvCluster, KvClusterSpec, KvClusterStatus};
