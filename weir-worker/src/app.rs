use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;
use uuid::Uuid;

use weir_core::paths::Namespace;
use weir_core::store::CoordinationStore;
use weir_core::{PlanRepository, WorkerRegistry};

use crate::config::Config;
use crate::feed::FeedProvider;
use crate::operator::OperatorProvider;
use crate::scheduler::Scheduler;

/// The application object for when Weir is running as a worker.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// This worker's process-unique id.
    worker_id: Arc<String>,
    /// The worker liveness registry, used here for deregistration.
    workers: WorkerRegistry,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the scheduler.
    scheduler_handle: JoinHandle<Result<()>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(
        config: Arc<Config>, store: Arc<dyn CoordinationStore>, feeds: Arc<dyn FeedProvider>, operators: Arc<dyn OperatorProvider>,
    ) -> Result<Self> {
        let ns = Namespace::new(&config.namespace_root).context("error building coordination namespace")?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(100);

        // Ensure the namespace exists, then register under a fresh id. A
        // restarted process is a new worker; its prior ephemeral state died
        // with its old session.
        PlanRepository::new(store.clone(), ns.clone()).ensure_namespace().await.context("error ensuring coordination namespace")?;
        let worker_id = Arc::new(Uuid::new_v4().to_string());
        let workers = WorkerRegistry::new(store.clone(), ns.clone());
        workers.register(&worker_id).await.context("error registering worker")?;

        let scheduler = Scheduler::new(config.clone(), worker_id.clone(), store, ns, feeds, operators, shutdown_tx.clone());
        let scheduler_handle = scheduler.spawn();

        Ok(Self {
            _config: config,
            worker_id,
            workers,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            scheduler_handle,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!(worker = %self.worker_id, "Weir worker is shutting down");
        if let Err(err) = self.scheduler_handle.await.context("error joining scheduler handle").and_then(|res| res) {
            tracing::error!(error = ?err, "error shutting down scheduler");
        }
        // Deregister explicitly for a prompt membership change; were the
        // process to die instead, session expiry covers the same ground.
        if let Err(err) = self.workers.deregister(&self.worker_id).await {
            tracing::error!(error = ?err, "error deregistering worker");
        }

        tracing::debug!(worker = %self.worker_id, "Weir worker shutdown complete");
        Ok(())
    }
}
