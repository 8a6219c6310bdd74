//! The worker liveness registry.
//!
//! A worker's presence under the workers path *is* its liveness signal:
//! there is no separate heartbeat payload, and the core never attempts to
//! detect liveness by any other heuristic. The ephemeral registration node
//! vanishes with the worker's session, which is what triggers cluster-wide
//! reassignment of its partitions.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{CoordError, CoordResult};
use crate::paths::Namespace;
use crate::store::{CoordinationStore, Mode, WatchEvent};

/// The registry of live workers.
#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn CoordinationStore>,
    ns: Namespace,
}

impl WorkerRegistry {
    /// Create a new instance.
    pub fn new(store: Arc<dyn CoordinationStore>, ns: Namespace) -> Self {
        Self { store, ns }
    }

    /// Register the given worker id as live.
    ///
    /// Fails with `AlreadyRegistered` if the id is already registered
    /// without an intervening deregister. Workers must not double-register.
    pub async fn register(&self, worker_id: &str) -> CoordResult<()> {
        match self.store.create(&self.ns.worker(worker_id), &[], Mode::Ephemeral).await {
            Ok(()) => {
                tracing::info!(worker = %worker_id, "worker registered");
                Ok(())
            }
            Err(CoordError::AlreadyExists(_)) => Err(CoordError::AlreadyRegistered(worker_id.to_string())),
            Err(err) => Err(err),
        }
    }

    /// Gracefully remove the given worker's registration. Idempotent.
    pub async fn deregister(&self, worker_id: &str) -> CoordResult<()> {
        match self.store.delete(&self.ns.worker(worker_id), None).await {
            Ok(()) => {
                tracing::info!(worker = %worker_id, "worker deregistered");
                Ok(())
            }
            Err(CoordError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// The set of currently-live worker ids.
    pub async fn live_workers(&self) -> CoordResult<BTreeSet<String>> {
        let children = self.store.children(&self.ns.workers()).await?;
        Ok(children.into_iter().collect())
    }

    /// Register a one-shot watch on cluster membership (worker joined, left
    /// gracefully, or session-expired).
    pub async fn watch_membership(&self) -> CoordResult<oneshot::Receiver<WatchEvent>> {
        self.store.watch(&self.ns.workers()).await
    }
}
