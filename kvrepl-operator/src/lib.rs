//! kvrepl Kubernetes Operator
//!
//! This crate converges the replication topology of Redis-protocol clusters
//! (Dragonfly, Redis, Valkey) running as pods: exactly one ready node acts as
//! master and every other ready node replicates from it.
//!
//! # Components
//!
//! - **Topology resolver** ([`topology`]): pure decisions over an observed node set
//! - **Replication engine** ([`engine`]): bootstrap, master transition and replica attachment
//! - **Seams**: [`directory::NodeDirectory`], [`command::NodeCommandClient`],
//!   [`store::RoleStore`] and [`store::PhaseTracker`], with Kubernetes and Redis implementations
//! - **Controller** ([`controller`]): the kube-runtime reconcile loop driving the engine
//!
//! # Example
//!
//! ```yaml
//! apiVersion: kvrepl.io/v1
//! kind: KvCluster
//! metadata:
//!   name: cache
//! spec:
//!   replicas: 3
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod config;
pub mod controller;
pub mod crd;
pub mod directory;
pub mod engine;
pub mod error;
pub mod lease;
pub mod store;
pub mod testing;
pub mod topology;

pub use config::OperatorConfig;
pub use crd::{ClusterPhase, KvCluster, KvClusterSpec, KvClusterStatus};
pub use engine::{Collaborators, ReplicationEngine};
pub use error::{OperatorError, OperatorFuture, OperatorResult};
pub use lease::{ClusterLease, ClusterLeases};
pub use topology::{ClusterRef, Node, Role};
