//! Per-cluster exclusive leases.
//!
//! Role labels and the phase field are last-writer-wins, so two
//! reconciliations of one cluster must never interleave. Every mutating
//! engine operation takes a [`ClusterLease`] for its cluster.

use crate::topology::ClusterRef;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table of per-cluster leases, keyed by `namespace/name`.
///
/// A slot lives only while a lease is held or awaited; the last lease
/// released removes it.
#[derive(Debug, Default)]
pub struct ClusterLeases {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ClusterLeases {
    /// Create an empty lease table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the cluster's lease is free and take it.
    pub async fn acquire(&self, cluster: &ClusterRef) -> ClusterLease {
        let slot = self.slot(cluster);
        let guard = slot.lock_owned().await;
        tracing::trace!(cluster = %cluster, "Acquired cluster lease");
        self.lease(cluster, guard)
    }

    /// Take the cluster's lease only if nobody holds it.
    pub fn try_acquire(&self, cluster: &ClusterRef) -> Option<ClusterLease> {
        let guard = self.slot(cluster).try_lock_owned().ok()?;
        Some(self.lease(cluster, guard))
    }

    /// Number of clusters with a held or awaited lease.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no lease is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, cluster: &ClusterRef) -> Arc<Mutex<()>> {
        Arc::clone(&self.slots.entry(cluster.key()).or_default())
    }

    fn lease(&self, cluster: &ClusterRef, guard: OwnedMutexGuard<()>) -> ClusterLease {
        ClusterLease {
            cluster: cluster.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }
}

/// Exclusive right to reconcile one cluster. Released on drop.
#[derive(Debug)]
pub struct ClusterLease {
    cluster: ClusterRef,
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ClusterLease {
    /// Cluster this lease covers.
    pub fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }
}

impl Drop for ClusterLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the slot, so it survives until the last one.
        self.slots
            .remove_if(&self.cluster.key(), |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_is_exclusive_per_cluster() {
        let leases = ClusterLeases::new();
        let c1 = ClusterRef::new("c1", "default");
        let c2 = ClusterRef::new("c2", "default");

        let held = leases.acquire(&c1).await;
        assert!(leases.try_acquire(&c1).is_none());
        assert!(leases.try_acquire(&c2).is_some());

        drop(held);
        assert!(leases.try_acquire(&c1).is_some());
    }

    #[tokio::test]
    async fn same_name_in_other_namespace_is_independent() {
        let leases = ClusterLeases::new();
        let _held = leases.acquire(&ClusterRef::new("c1", "a")).await;
        assert!(leases.try_acquire(&ClusterRef::new("c1", "b")).is_some());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let leases = Arc::new(ClusterLeases::new());
        let cluster = ClusterRef::new("c1", "default");
        let held = leases.acquire(&cluster).await;

        let waiter = {
            let leases = Arc::clone(&leases);
            let cluster = cluster.clone();
            tokio::spawn(async move { leases.acquire(&cluster).await.cluster().clone() })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        assert_eq!(waiter.await.unwrap(), cluster);
    }

    #[tokio::test]
    async fn released_lease_leaves_no_slot_behind() {
        let leases = ClusterLeases::new();
        let c1 = ClusterRef::new("c1", "default");

        let held = leases.acquire(&c1).await;
        assert_eq!(leases.len(), 1);

        drop(held);
        assert!(leases.is_empty());
        assert!(leases.try_acquire(&c1).is_some());
        assert!(leases.is_empty());
    }

    #[tokio::test]
    async fn slot_survives_while_a_waiter_is_queued() {
        let leases = Arc::new(ClusterLeases::new());
        let cluster = ClusterRef::new("c1", "default");
        let held = leases.acquire(&cluster).await;

        let waiter = {
            let leases = Arc::clone(&leases);
            let cluster = cluster.clone();
            tokio::spawn(async move {
                let _lease = leases.acquire(&cluster).await;
            })
        };
        while Arc::strong_count(&leases.slot(&cluster)) < 4 {
            tokio::task::yield_now().await;
        }

        drop(held);
        assert_eq!(leases.len(), 1);
        waiter.await.unwrap();
        assert!(leases.is_empty());
    }
}
