//! The coordination store abstraction.
//!
//! Weir does not implement consensus. It consumes an external coordination
//! store which already provides a linearizable hierarchical namespace with
//! persistent and ephemeral nodes, conditional writes, and change watches.
//! Correctness of "at most one owner per partition" rests entirely on the
//! store's create-if-absent atomicity; no additional distributed lock is
//! layered on top.
//!
//! A store handle represents one session. All ephemeral nodes created
//! through a handle vanish atomically when that session ends, which is the
//! sole liveness signal of the system.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::CoordResult;

/// The creation mode of a coordination store node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// The node persists until explicitly deleted.
    Persistent,
    /// The node is bound to the creating session and is removed atomically
    /// when that session ends.
    Ephemeral,
}

/// Metadata of an existing node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeStat {
    /// The node's optimistic version counter, incremented on every data
    /// update.
    pub version: u64,
}

/// The change which triggered a watch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchEvent {
    /// The node's child list changed.
    ChildrenChanged,
    /// The node's data changed, including node creation.
    DataChanged,
    /// The node was deleted.
    Deleted,
}

/// The operations Weir requires of a coordination store.
///
/// Watches fire at most once per registration; callers needing continued
/// freshness re-arm explicitly, and must pair every re-arm with a fresh read
/// (arm-then-read) so no change is missed between registrations.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Create a node at the given path.
    ///
    /// Fails with `AlreadyExists` if the path is taken, and `NotFound` if
    /// the parent path does not exist.
    async fn create(&self, path: &str, data: &[u8], mode: Mode) -> CoordResult<()>;

    /// Return the node's metadata, or `None` if the path does not exist.
    async fn exists(&self, path: &str) -> CoordResult<Option<NodeStat>>;

    /// Return the node's data along with its current version.
    async fn get(&self, path: &str) -> CoordResult<(Vec<u8>, u64)>;

    /// Conditionally overwrite the node's data.
    ///
    /// Fails with `VersionConflict` if `expected_version` is stale.
    async fn set(&self, path: &str, data: &[u8], expected_version: u64) -> CoordResult<()>;

    /// Return the names of the node's children, in no particular order.
    async fn children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Delete the node at the given path.
    ///
    /// When `expected_version` is given, fails with `VersionConflict` if it
    /// is stale. The node must have no children.
    async fn delete(&self, path: &str, expected_version: Option<u64>) -> CoordResult<()>;

    /// Register a one-shot watch on the given path.
    ///
    /// The returned receiver resolves at most once, on the next child-list
    /// or data change of the node (or on its deletion). The path does not
    /// need to exist yet; creation then counts as a data change.
    async fn watch(&self, path: &str) -> CoordResult<oneshot::Receiver<WatchEvent>>;
}
