//! The per-worker scheduler.
//!
//! Every worker runs one scheduler. It watches the plan catalog and cluster
//! membership, computes the partitions this worker should own from a
//! deterministic balance function, and drives claim/release through the
//! assignment registry. Because every worker computes the same targets from
//! the same inputs, convergence needs no negotiation: the store's
//! create-if-absent resolves any transient race, and the loser simply backs
//! off.
//!
//! Wake sources are the store watches, driver exits, shutdown, and a
//! periodic fallback tick. Watches fire at most once per registration, so
//! each pass re-arms them before reading (arm-then-read) and the tick
//! bounds the damage of any missed registration.


use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use weir_core::paths::Namespace;
use weir_core::plan::Plan;
use weir_core::store::{CoordinationStore, WatchEvent};
use weir_core::{PartitionAssignmentRegistry, PlanRepository, WorkerRegistry};

use crate::config::Config;
use crate::driver::{Driver, DriverExit, DriverOutcome};
use crate::error::{CoordError, ShutdownError};
use crate::feed::FeedProvider;
use crate::operator::{OperatorProvider, OperatorTree};

const METRIC_CLAIMS_WON: &str = "scheduler_claims_won";
const METRIC_CLAIMS_LOST: &str = "scheduler_claims_lost";
const METRIC_DRIVER_FAILURES: &str = "scheduler_driver_failures";
const METRIC_PASS_ERRORS: &str = "scheduler_pass_errors";

/// The status recorded on an assignment once its driver is running.
const STATUS_RUNNING: &str = "running";
/// The upper bound of the random jitter added to the tick period, so the
/// cluster's fallback passes do not align.
const TICK_JITTER_MS: u64 = 250;

/// One (plan, partition) scheduling unit.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PartitionKey {
    /// The plan name.
    pub plan: String,
    /// The feed partition id.
    pub partition: String,
}

/// A handle to one spawned driver.
struct DriverHandle {
    /// The driver's cooperative stop signal.
    stop_tx: watch::Sender<bool>,
    /// The driver's join handle.
    handle: JoinHandle<()>,
}

/// The scheduling control loop of one worker.
pub struct Scheduler {
    /// The application's runtime config.
    config: Arc<Config>,
    /// This worker's process-unique id.
    worker_id: Arc<String>,

    /// The plan repository.
    plans: PlanRepository,
    /// The worker liveness registry.
    workers: WorkerRegistry,
    /// The partition assignment registry.
    assignments: PartitionAssignmentRegistry,
    /// The feed topology collaborator.
    feeds: Arc<dyn FeedProvider>,
    /// The operator tree builder collaborator.
    operators: Arc<dyn OperatorProvider>,

    /// All drivers currently running on this worker.
    drivers: HashMap<PartitionKey, DriverHandle>,
    /// Partitions which reached end of stream here, kept so this worker
    /// does not immediately re-claim them.
    finished: HashSet<PartitionKey>,
    /// The one-shot store watches armed by the last pass.
    watches: FuturesUnordered<oneshot::Receiver<WatchEvent>>,

    /// A channel of driver exit reports.
    exits_tx: mpsc::Sender<DriverExit>,
    /// A channel of driver exit reports.
    exits_rx: ReceiverStream<DriverExit>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
    /// A fatal error which requires this worker to shut down.
    fatal: Option<ShutdownError>,
}

impl Scheduler {
    /// Create a new instance.
    pub fn new(
        config: Arc<Config>, worker_id: Arc<String>, store: Arc<dyn CoordinationStore>, ns: Namespace, feeds: Arc<dyn FeedProvider>,
        operators: Arc<dyn OperatorProvider>, shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        metrics::register_counter!(METRIC_CLAIMS_WON, metrics::Unit::Count, "partition claims won by this worker");
        metrics::register_counter!(METRIC_CLAIMS_LOST, metrics::Unit::Count, "partition claim races lost by this worker");
        metrics::register_counter!(METRIC_DRIVER_FAILURES, metrics::Unit::Count, "drivers which terminated in failure");
        metrics::register_counter!(METRIC_PASS_ERRORS, metrics::Unit::Count, "scheduling passes which ended in error");

        let (exits_tx, exits_rx) = mpsc::channel(1000);
        Self {
            config,
            worker_id,
            plans: PlanRepository::new(store.clone(), ns.clone()),
            workers: WorkerRegistry::new(store.clone(), ns.clone()),
            assignments: PartitionAssignmentRegistry::new(store, ns),
            feeds,
            operators,
            drivers: Default::default(),
            finished: Default::default(),
            watches: FuturesUnordered::new(),
            exits_tx,
            exits_rx: ReceiverStream::new(exits_rx),
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
            fatal: None,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        tracing::info!(worker = %self.worker_id, "scheduler started");
        let jitter = rand::thread_rng().gen_range(0..=TICK_JITTER_MS);
        let mut tick = tokio::time::interval(self.config.tick_interval() + Duration::from_millis(jitter));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.execute_pass().await;
            if self.fatal.is_some() {
                break;
            }
            tokio::select! {
                _ = tick.tick() => continue,
                Some(_event) = self.watches.next() => continue,
                Some(exit) = self.exits_rx.next() => self.handle_driver_exit(exit).await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        self.shutdown().await;
        tracing::info!(worker = %self.worker_id, "scheduler shutdown complete");
        match self.fatal.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Execute one discover/balance/reconcile/claim pass.
    #[tracing::instrument(level = "debug", skip(self), fields(worker = %self.worker_id))]
    async fn execute_pass(&mut self) {
        if let Err(err) = self.try_execute_pass().await {
            metrics::increment_counter!(METRIC_PASS_ERRORS);
            tracing::error!(error = ?err, "error during scheduling pass");
            if matches!(err, CoordError::SessionExpired) {
                // Session loss is equivalent to this worker's death: every
                // ephemeral node is already gone and the cluster is
                // reassigning. Shut down rather than resurrect prior state.
                self.fatal = Some(ShutdownError(anyhow::Error::from(err).context("coordination session lost")));
                let _ = self.shutdown_tx.send(());
            }
        }
    }

    async fn try_execute_pass(&mut self) -> Result<(), CoordError> {
        // Re-arm the watches before reading, so any change landing between
        // this read and the next pass wakes the loop.
        self.watches = FuturesUnordered::new();
        let membership_watch = self.workers.watch_membership().await?;
        self.watches.push(membership_watch);
        let catalog_watch = self.plans.watch_plans().await?;
        self.watches.push(catalog_watch);

        // Discover: live membership, the plan set, and feed topology.
        let live = self.workers.live_workers().await?;
        let mut desired: HashMap<PartitionKey, Arc<Plan>> = HashMap::new();
        for name in self.plans.list_names().await? {
            let plan_watch = self.plans.watch_plan(&name).await?;
            self.watches.push(plan_watch);
            let (plan, _version) = match self.plans.get(&name).await {
                Ok(found) => found,
                // Deleted between the listing and the read.
                Err(CoordError::NotFound(_)) => continue,
                Err(CoordError::Other(err)) => {
                    tracing::error!(error = ?err, plan = %name, "error decoding plan, skipping");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if plan.disabled {
                continue;
            }
            let partitions = match self.feeds.partitions(&plan.feed).await {
                Ok(partitions) => partitions,
                Err(err) => {
                    tracing::error!(error = ?err, plan = %name, "error resolving feed partitions, skipping plan");
                    continue;
                }
            };

            // Balance: deterministic targets, identical on every worker.
            let plan = Arc::new(plan);
            for (partition, owner) in balance(&live, &partitions, plan.max_workers) {
                if owner == self.worker_id.as_str() {
                    desired.insert(PartitionKey { plan: name.clone(), partition }, plan.clone());
                }
            }
        }

        // Reconcile: stop and release every partition this worker drives
        // which is no longer its target (plan disabled or deleted, the
        // worker set changed, or the max workers cap moved the target).
        let stale: Vec<PartitionKey> = self.drivers.keys().filter(|key| !desired.contains_key(*key)).cloned().collect();
        for key in stale {
            self.stop_driver(&key).await;
            self.assignments.release(&key.plan, &key.partition, &self.worker_id).await?;
        }
        // Forget finished partitions which are no longer targeted, so a
        // later re-enable starts from a clean slate.
        self.finished.retain(|key| desired.contains_key(key));

        // Claim: everything targeted here and not already driven.
        for (key, plan) in desired {
            if self.drivers.contains_key(&key) || self.finished.contains(&key) {
                continue;
            }
            if self.assignments.claim(&key.plan, &key.partition, &self.worker_id).await? {
                metrics::increment_counter!(METRIC_CLAIMS_WON);
                self.start_driver(key, plan).await;
            } else {
                // Lost the race; the winner drives the partition.
                metrics::increment_counter!(METRIC_CLAIMS_LOST);
                tracing::debug!(plan = %key.plan, partition = %key.partition, "claim lost");
            }
        }
        Ok(())
    }

    /// Spawn a driver for a freshly claimed partition.
    ///
    /// A failure to start releases the claim immediately so another worker
    /// (or a later pass here) may pick the partition up.
    #[tracing::instrument(level = "debug", skip(self, plan), fields(plan = %key.plan, partition = %key.partition))]
    async fn start_driver(&mut self, key: PartitionKey, plan: Arc<Plan>) {
        match self.try_start_driver(&key, &plan).await {
            Ok(handle) => {
                self.drivers.insert(key.clone(), handle);
                if let Err(err) = self.assignments.update_status(&key.plan, &key.partition, &self.worker_id, STATUS_RUNNING).await {
                    tracing::warn!(error = ?err, "error recording driver status");
                }
            }
            Err(err) => {
                metrics::increment_counter!(METRIC_DRIVER_FAILURES);
                tracing::error!(error = ?err, "error starting driver, releasing claim");
                if let Err(err) = self.assignments.release(&key.plan, &key.partition, &self.worker_id).await {
                    tracing::error!(error = ?err, "error releasing claim after failed driver start");
                }
            }
        }
    }

    async fn try_start_driver(&mut self, key: &PartitionKey, plan: &Plan) -> Result<DriverHandle> {
        let partition = self.feeds.open(&plan.feed, &key.partition).await.context("error opening feed partition")?;
        let tree = OperatorTree::build(self.operators.as_ref(), &plan.root_operator).context("error building operator tree")?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = Driver::new(Arc::new(key.plan.clone()), key.partition.clone(), partition, tree, stop_rx, self.exits_tx.clone());
        let handle = driver.spawn();
        Ok(DriverHandle { stop_tx, handle })
    }

    /// Cooperatively stop one driver and join it.
    async fn stop_driver(&mut self, key: &PartitionKey) {
        let handle = match self.drivers.remove(key) {
            Some(handle) => handle,
            None => return,
        };
        tracing::debug!(plan = %key.plan, partition = %key.partition, "stopping driver");
        let _ = handle.stop_tx.send(true);
        if let Err(err) = handle.handle.await {
            tracing::error!(error = ?err, "error joining driver task");
        }
    }

    /// Handle a driver's exit report.
    #[tracing::instrument(level = "debug", skip(self, exit), fields(plan = %exit.plan, partition = %exit.partition))]
    async fn handle_driver_exit(&mut self, exit: DriverExit) {
        let key = PartitionKey { plan: exit.plan.as_ref().clone(), partition: exit.partition };
        match exit.outcome {
            // Stops are initiated by reconcile or shutdown, which also
            // handle the release; nothing further to do.
            DriverOutcome::Stopped => (),
            DriverOutcome::EndOfStream => {
                if let Some(handle) = self.drivers.remove(&key) {
                    let _ = handle.handle.await;
                }
                self.finished.insert(key.clone());
                if let Err(err) = self.assignments.release(&key.plan, &key.partition, &self.worker_id).await {
                    tracing::error!(error = ?err, "error releasing finished partition");
                }
            }
            DriverOutcome::Failed(err) => {
                metrics::increment_counter!(METRIC_DRIVER_FAILURES);
                tracing::error!(error = ?err, "driver failed, releasing partition for re-claim");
                if let Some(handle) = self.drivers.remove(&key) {
                    let _ = handle.handle.await;
                }
                if let Err(err) = self.assignments.release(&key.plan, &key.partition, &self.worker_id).await {
                    tracing::error!(error = ?err, "error releasing failed partition");
                }
            }
        }
    }

    /// Stop all drivers and release their claims.
    async fn shutdown(&mut self) {
        tracing::debug!(worker = %self.worker_id, "scheduler shutting down");
        let keys: Vec<PartitionKey> = self.drivers.keys().cloned().collect();
        for key in keys {
            self.stop_driver(&key).await;
            if let Err(err) = self.assignments.release(&key.plan, &key.partition, &self.worker_id).await {
                tracing::warn!(error = ?err, plan = %key.plan, partition = %key.partition, "error releasing claim during shutdown");
            }
        }
    }
}

/// Compute the deterministic partition-to-worker mapping.
///
/// A pure function of (sorted live worker ids, sorted partition ids,
/// `max_workers`): the eligible workers are the first `max_workers` of the
/// sorted live set (`0` meaning uncapped), and the partition at sorted
/// index `i` maps to `eligible[i % eligible.len()]`. Every worker computes
/// identical targets from the same inputs, so no negotiation is needed.
pub(crate) fn balance<'a>(live: &'a BTreeSet<String>, partitions: &[String], max_workers: u32) -> Vec<(String, &'a str)> {
    let cap = if max_workers == 0 { live.len() } else { max_workers as usize };
    let eligible: Vec<&str> = live.iter().take(cap).map(String::as_str).collect();
    if eligible.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<&String> = partitions.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .enumerate()
        .map(|(idx, partition)| (partition.clone(), eligible[idx % eligible.len()]))
        .collect()
}
