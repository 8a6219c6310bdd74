//! The partition assignment registry.
//!
//! Ownership of a (plan, partition) pair is an ephemeral claim node keyed by
//! the partition id. The store's create-if-absent is the single point of
//! truth for ownership: a claim either creates the node and wins, or finds
//! it taken and loses. No application-level lock is involved, and a lost
//! race is an expected outcome rather than an error. Claims vanish with the
//! owning session; graceful handoff deletes them explicitly.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{CoordError, CoordResult};
use crate::paths::Namespace;
use crate::store::{CoordinationStore, Mode};

/// The status string recorded when a claim is first created.
pub const STATUS_CLAIMED: &str = "claimed";

/// A lightweight, best-effort status record associated with one assignment.
///
/// Readable by any worker for observability and rebalance decisions. Not
/// authoritative for ownership; ownership is the ephemeral claim node
/// itself.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct WorkerStatus {
    /// The id of the worker holding the assignment.
    pub worker: String,
    /// The feed partition id of the assignment.
    pub partition: String,
    /// A freeform status string.
    pub status: String,
}

impl WorkerStatus {
    /// Encode this status as its JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("error serializing worker status")
    }

    /// Decode a status from its JSON payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("error deserializing worker status")
    }
}

/// The registry of per-plan partition claims.
#[derive(Clone)]
pub struct PartitionAssignmentRegistry {
    store: Arc<dyn CoordinationStore>,
    ns: Namespace,
}

impl PartitionAssignmentRegistry {
    /// Create a new instance.
    pub fn new(store: Arc<dyn CoordinationStore>, ns: Namespace) -> Self {
        Self { store, ns }
    }

    /// Attempt to claim the given partition of the given plan.
    ///
    /// Returns `true` when this worker now owns the partition, `false` when
    /// another claim already holds the path (an expected race outcome, not
    /// an error).
    pub async fn claim(&self, plan_name: &str, partition_id: &str, worker_id: &str) -> CoordResult<bool> {
        let status = WorkerStatus {
            worker: worker_id.to_string(),
            partition: partition_id.to_string(),
            status: STATUS_CLAIMED.to_string(),
        };
        let data = status.encode()?;
        match self.store.create(&self.ns.assignment(plan_name, partition_id), &data, Mode::Ephemeral).await {
            Ok(()) => Ok(true),
            Err(CoordError::AlreadyExists(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Release the given worker's claim on the given partition.
    ///
    /// Used on graceful handoff only; crash release happens through session
    /// expiry. Idempotent when the claim is already gone, and a no-op when
    /// the claim is held by a different worker.
    pub async fn release(&self, plan_name: &str, partition_id: &str, worker_id: &str) -> CoordResult<()> {
        let path = self.ns.assignment(plan_name, partition_id);
        let (data, version) = match self.store.get(&path).await {
            Ok(found) => found,
            Err(CoordError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        match WorkerStatus::decode(&data) {
            Ok(status) if status.worker != worker_id => {
                tracing::warn!(%path, holder = %status.worker, worker = %worker_id, "refusing to release claim held by another worker");
                return Ok(());
            }
            Ok(_) => (),
            Err(err) => tracing::warn!(error = ?err, %path, "releasing claim with malformed payload"),
        }
        match self.store.delete(&path, Some(version)).await {
            Ok(()) | Err(CoordError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Update the status string of an assignment held by the given worker.
    ///
    /// Best-effort observability data; a concurrent release simply wins.
    pub async fn update_status(&self, plan_name: &str, partition_id: &str, worker_id: &str, status: &str) -> CoordResult<()> {
        let path = self.ns.assignment(plan_name, partition_id);
        let (data, version) = self.store.get(&path).await?;
        let mut record = WorkerStatus::decode(&data)?;
        if record.worker != worker_id {
            return Err(CoordError::Other(anyhow::anyhow!(
                "claim at '{}' is held by worker '{}', not '{}'",
                path,
                record.worker,
                worker_id
            )));
        }
        record.status = status.to_string();
        self.store.set(&path, &record.encode()?, version).await
    }

    /// Enumerate the status records of all claims under the given plan.
    ///
    /// Best-effort: individual read failures are logged and skipped, since
    /// this data is advisory rather than authoritative.
    pub async fn assignments_for(&self, plan_name: &str) -> CoordResult<Vec<WorkerStatus>> {
        let mut statuses = Vec::new();
        for child in self.store.children(&self.ns.plan(plan_name)).await? {
            let path = self.ns.assignment(plan_name, &child);
            match self.store.get(&path).await {
                Ok((data, _)) => match WorkerStatus::decode(&data) {
                    Ok(status) => statuses.push(status),
                    Err(err) => tracing::warn!(error = ?err, %path, "skipping malformed claim payload"),
                },
                Err(CoordError::NotFound(_)) => continue,
                Err(err) => tracing::warn!(error = ?err, %path, "error reading claim node, skipping"),
            }
        }
        Ok(statuses)
    }
}
