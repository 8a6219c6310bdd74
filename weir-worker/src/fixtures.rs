//! Test fixtures for driver and scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use weir_core::paths::Namespace;
use weir_core::plan::{FeedDescriptor, OperatorDescriptor, Plan};
use weir_core::store::memory::{MemorySession, MemoryStore};
use weir_core::store::CoordinationStore;
use weir_core::{PlanRepository, WorkerRegistry};

use crate::config::Config;
use crate::feed::{FeedPartition, FeedProvider};
use crate::operator::{Collector, Operator, OperatorProvider, OperatorRegistry};
use crate::scheduler::Scheduler;
use crate::tuple::Tuple;

/// A shared sink of (operator tag, tuple) pairs recorded during a test.
pub type Recorded = Arc<Mutex<Vec<(String, Tuple)>>>;

/// Build a tuple carrying a single "value" field.
pub fn value_tuple(value: &str) -> Tuple {
    let mut tuple = Tuple::new();
    tuple.set_field("value", serde_json::Value::String(value.into()));
    tuple
}

/// Build a descriptor for the given operator kind, carrying a tag property.
pub fn descriptor(kind: &str, tag: &str) -> OperatorDescriptor {
    let mut properties = std::collections::BTreeMap::new();
    properties.insert("tag".to_string(), tag.to_string());
    OperatorDescriptor {
        kind: kind.into(),
        properties,
        children: Vec::new(),
    }
}

/// Build a plan over the given feed kind with a single recording root.
pub fn recording_plan(name: &str, feed_kind: &str, max_workers: u32) -> Plan {
    Plan {
        name: name.into(),
        feed: FeedDescriptor { kind: feed_kind.into(), properties: Default::default() },
        root_operator: descriptor("recording", name),
        disabled: false,
        max_workers,
    }
}

/// A feed provider serving fixed in-memory partitions.
pub struct StaticFeedProvider {
    partitions: HashMap<String, Vec<Tuple>>,
    /// Block instead of reporting end of stream once a partition is drained.
    hold_open: bool,
    /// An optional delay applied before every tuple is served.
    throttle: Option<Duration>,
}

impl StaticFeedProvider {
    pub fn new(partitions: HashMap<String, Vec<Tuple>>) -> Self {
        Self { partitions, hold_open: false, throttle: None }
    }

    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn throttled(mut self, delay: Duration) -> Self {
        self.throttle = Some(delay);
        self
    }
}

#[async_trait]
impl FeedProvider for StaticFeedProvider {
    async fn partitions(&self, _feed: &FeedDescriptor) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.partitions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn open(&self, _feed: &FeedDescriptor, partition_id: &str) -> Result<Box<dyn FeedPartition>> {
        let tuples = match self.partitions.get(partition_id) {
            Some(tuples) => tuples.clone(),
            None => bail!("unknown partition '{}'", partition_id),
        };
        Ok(Box::new(StaticFeedPartition {
            id: partition_id.to_string(),
            tuples: tuples.into(),
            hold_open: self.hold_open,
            throttle: self.throttle,
        }))
    }
}

/// One open partition of a `StaticFeedProvider`.
pub struct StaticFeedPartition {
    id: String,
    tuples: VecDeque<Tuple>,
    hold_open: bool,
    throttle: Option<Duration>,
}

#[async_trait]
impl FeedPartition for StaticFeedPartition {
    fn id(&self) -> &str {
        &self.id
    }

    async fn next(&mut self, slot: &mut Tuple) -> Result<bool> {
        if self.tuples.is_empty() {
            if self.hold_open {
                futures::future::pending::<()>().await;
            }
            return Ok(false);
        }
        // Delay before the pop so a cancelled read does not lose the tuple.
        if let Some(delay) = self.throttle {
            tokio::time::sleep(delay).await;
        }
        *slot = self.tuples.pop_front().expect("checked non-empty above");
        Ok(true)
    }
}

/// An operator recording every tuple it handles into a shared sink, then
/// forwarding it unchanged.
struct RecordingOperator {
    tag: String,
    sink: Recorded,
}

impl Operator for RecordingOperator {
    fn handle_tuple(&mut self, tuple: &Tuple, collector: &mut Collector) -> Result<()> {
        self.sink.lock().expect("recorded sink lock poisoned").push((self.tag.clone(), tuple.clone()));
        collector.emit(tuple.clone());
        Ok(())
    }
}

/// An operator failing on every tuple.
struct FailingOperator;

impl Operator for FailingOperator {
    fn handle_tuple(&mut self, _tuple: &Tuple, _collector: &mut Collector) -> Result<()> {
        bail!("induced operator failure")
    }
}

/// An operator failing at initialization.
struct BadInitOperator;

impl Operator for BadInitOperator {
    fn initialize(&mut self) -> Result<()> {
        bail!("induced initialization failure")
    }

    fn handle_tuple(&mut self, _tuple: &Tuple, _collector: &mut Collector) -> Result<()> {
        Ok(())
    }
}

/// Build an operator registry with the test kinds registered, all recording
/// into the given sink where applicable.
pub fn test_operators(sink: &Recorded) -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    let recording_sink = sink.clone();
    registry.register("recording", move |descriptor| {
        let tag = descriptor.properties.get("tag").cloned().unwrap_or_default();
        Ok(Box::new(RecordingOperator { tag, sink: recording_sink.clone() }))
    });
    registry.register("failing", |_descriptor| Ok(Box::new(FailingOperator)));
    registry.register("bad_init", |_descriptor| Ok(Box::new(BadInitOperator)));
    registry
}

/// One spawned worker under test.
pub struct TestWorker {
    /// The worker's registered id.
    pub id: Arc<String>,
    /// The worker's own store session, kept for induced expiry.
    pub session: Arc<MemorySession>,
    /// The worker's shutdown channel.
    pub shutdown_tx: broadcast::Sender<()>,
    /// The scheduler's join handle.
    pub handle: JoinHandle<Result<()>>,
}

impl TestWorker {
    /// Trigger graceful shutdown and join the scheduler.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.handle.await?
    }
}

/// Register a fresh worker on its own session and spawn its scheduler.
pub async fn spawn_worker(
    store: &MemoryStore, ns: &Namespace, feeds: Arc<dyn FeedProvider>, operators: Arc<dyn OperatorProvider>,
) -> Result<TestWorker> {
    let session: Arc<MemorySession> = Arc::new(store.session());
    let coord: Arc<dyn CoordinationStore> = session.clone();
    PlanRepository::new(coord.clone(), ns.clone()).ensure_namespace().await?;
    let id = Arc::new(Uuid::new_v4().to_string());
    WorkerRegistry::new(coord.clone(), ns.clone()).register(&id).await?;
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(100);
    let scheduler = Scheduler::new(Config::new_test(), id.clone(), coord, ns.clone(), feeds, operators, shutdown_tx.clone());
    let handle = scheduler.spawn();
    Ok(TestWorker { id, session, shutdown_tx, handle })
}
