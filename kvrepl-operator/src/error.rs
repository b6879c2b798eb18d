//! Error types for the kvrepl operator.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during operator operations.
///
/// The first four variants are the replication engine's taxonomy. Each one
/// aborts the running operation and is returned to the caller as-is.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Cluster or node record not found, or the directory query failed.
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// No ready node labeled master when one was required.
    #[error("No ready master found in cluster {cluster}")]
    NoMasterFound {
        /// Cluster key (`namespace/name`).
        cluster: String,
    },

    /// Administrative directive rejected or transport failure.
    #[error("Command to {address} failed: {reason}")]
    Command {
        /// Administrative address of the node.
        address: String,
        /// Failure cause.
        reason: String,
    },

    /// Role or phase persistence failed.
    #[error("Store update failed: {0}")]
    Store(String),

    /// The lease presented does not cover the cluster being reconciled.
    #[error("Lease for {held} cannot be used to reconcile {requested}")]
    LeaseMismatch {
        /// Cluster the lease was acquired for.
        held: String,
        /// Cluster the operation targets.
        requested: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OperatorError {
    /// Build a [`OperatorError::Command`] for the given node address.
    pub fn command(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::Command {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

/// Boxed future returned by the engine's collaborator traits.
pub type OperatorFuture<'a, T> = Pin<Box<dyn Future<Output = OperatorResult<T>> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_names_the_node() {
        let err = OperatorError::command("10.0.0.3:6379", "connection refused");
        assert_eq!(
            err.to_string(),
            "Command to 10.0.0.3:6379 failed: connection refused"
        );
    }

    #[test]
    fn no_master_found_names_the_cluster() {
        let err = OperatorError::NoMasterFound {
            cluster: "default/c1".into(),
        };
        assert_eq!(err.to_string(), "No ready master found in cluster default/c1");
    }
}
