//! The consumed feed interfaces.
//!
//! Concrete feeds (message-queue partition readers and the like) are
//! external collaborators; the coordination core only depends on the two
//! contracts here: enumerating a feed's partitions from its descriptor, and
//! pulling tuples from one open partition.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use weir_core::plan::FeedDescriptor;

use crate::tuple::Tuple;

/// One open feed partition, read by exactly one driver.
#[async_trait]
pub trait FeedPartition: Send {
    /// The id of this partition.
    fn id(&self) -> &str;

    /// Populate the slot with the next tuple.
    ///
    /// Blocks until a tuple is available; returns `false` at the end of the
    /// partition. The call must be cancel-safe: drivers race it against
    /// their stop signal.
    async fn next(&mut self, slot: &mut Tuple) -> Result<bool>;
}

/// A type capable of resolving feed descriptors into partitions.
#[async_trait]
pub trait FeedProvider: Send + Sync + 'static {
    /// Enumerate the partition ids of the described feed.
    async fn partitions(&self, feed: &FeedDescriptor) -> Result<Vec<String>>;

    /// Open the given partition of the described feed for reading.
    async fn open(&self, feed: &FeedDescriptor, partition_id: &str) -> Result<Box<dyn FeedPartition>>;
}

/// A feed provider dispatching on the descriptor kind over a set of
/// registered providers.
#[derive(Default)]
pub struct FeedRegistry {
    providers: HashMap<String, Arc<dyn FeedProvider>>,
}

impl FeedRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for the given feed kind.
    pub fn register(&mut self, kind: &str, provider: Arc<dyn FeedProvider>) {
        self.providers.insert(kind.to_string(), provider);
    }

    fn provider_for(&self, feed: &FeedDescriptor) -> Result<&Arc<dyn FeedProvider>> {
        match self.providers.get(&feed.kind) {
            Some(provider) => Ok(provider),
            None => bail!("unknown feed kind '{}'", feed.kind),
        }
    }
}

#[async_trait]
impl FeedProvider for FeedRegistry {
    async fn partitions(&self, feed: &FeedDescriptor) -> Result<Vec<String>> {
        self.provider_for(feed)?.partitions(feed).await
    }

    async fn open(&self, feed: &FeedDescriptor, partition_id: &str) -> Result<Box<dyn FeedPartition>> {
        self.provider_for(feed)?.open(feed, partition_id).await
    }
}
