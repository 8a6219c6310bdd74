//! The plan repository.
//!
//! CRUD over plan definitions stored in the coordination store. A plan node's
//! version counter is the plan's optimistic version: updates carry the
//! caller's observed version and are rejected with `VersionConflict` when it
//! is stale. All reads are point-in-time snapshots; callers needing
//! freshness register a watch explicitly.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;

use crate::assignments::WorkerStatus;
use crate::error::{CoordError, CoordResult};
use crate::paths::Namespace;
use crate::plan::Plan;
use crate::store::{CoordinationStore, Mode, WatchEvent};

/// The repository of plan definitions.
#[derive(Clone)]
pub struct PlanRepository {
    store: Arc<dyn CoordinationStore>,
    ns: Namespace,
}

impl PlanRepository {
    /// Create a new instance.
    pub fn new(store: Arc<dyn CoordinationStore>, ns: Namespace) -> Self {
        Self { store, ns }
    }

    /// Idempotently create the base, workers and plans paths.
    pub async fn ensure_namespace(&self) -> CoordResult<()> {
        for path in [self.ns.root().to_string(), self.ns.workers(), self.ns.plans()] {
            match self.store.create(&path, &[], Mode::Persistent).await {
                Ok(()) => tracing::info!(%path, "created namespace path"),
                Err(CoordError::AlreadyExists(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Create a new plan.
    ///
    /// Fails with `PlanExists` if a plan of the same name already exists.
    pub async fn create(&self, plan: &Plan) -> CoordResult<()> {
        plan.validate()?;
        let data = plan.encode()?;
        match self.store.create(&self.ns.plan(&plan.name), &data, Mode::Persistent).await {
            Ok(()) => Ok(()),
            Err(CoordError::AlreadyExists(_)) => Err(CoordError::PlanExists(plan.name.clone())),
            Err(err) => Err(err),
        }
    }

    /// Update an existing plan.
    ///
    /// Fails with `VersionConflict` when `expected_version` is stale, and
    /// with `NotFound` when the plan has vanished.
    pub async fn update(&self, plan: &Plan, expected_version: u64) -> CoordResult<()> {
        plan.validate()?;
        let data = plan.encode()?;
        self.store.set(&self.ns.plan(&plan.name), &data, expected_version).await
    }

    /// Fetch the named plan along with its current version.
    pub async fn get(&self, name: &str) -> CoordResult<(Plan, u64)> {
        let (data, version) = self.store.get(&self.ns.plan(name)).await?;
        let plan = Plan::decode(&data).with_context(|| format!("error decoding plan '{}'", name))?;
        Ok((plan, version))
    }

    /// List the names of all stored plans.
    pub async fn list_names(&self) -> CoordResult<BTreeSet<String>> {
        let children = self.store.children(&self.ns.plans()).await?;
        Ok(children.into_iter().collect())
    }

    /// Enumerate the ids of all workers currently holding a claim under the
    /// named plan.
    ///
    /// Advisory data: unreadable claim nodes are skipped with a warning.
    pub async fn find_workers_for_plan(&self, name: &str) -> CoordResult<BTreeSet<String>> {
        let plan_path = self.ns.plan(name);
        let mut workers = BTreeSet::new();
        for child in self.store.children(&plan_path).await? {
            let path = self.ns.assignment(name, &child);
            match self.store.get(&path).await {
                Ok((data, _)) => match WorkerStatus::decode(&data) {
                    Ok(status) => {
                        workers.insert(status.worker);
                    }
                    Err(err) => tracing::warn!(error = ?err, %path, "skipping malformed claim payload"),
                },
                // The claim may have been released between the listing and the read.
                Err(CoordError::NotFound(_)) => continue,
                Err(err) => tracing::warn!(error = ?err, %path, "error reading claim node, skipping"),
            }
        }
        Ok(workers)
    }

    /// Register a one-shot watch on the plan set (plan added or removed).
    pub async fn watch_plans(&self) -> CoordResult<oneshot::Receiver<WatchEvent>> {
        self.store.watch(&self.ns.plans()).await
    }

    /// Register a one-shot watch on the named plan's data (update, disable
    /// or deletion).
    pub async fn watch_plan(&self, name: &str) -> CoordResult<oneshot::Receiver<WatchEvent>> {
        self.store.watch(&self.ns.plan(name)).await
    }
}
