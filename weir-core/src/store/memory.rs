//! The in-memory coordination store backend.
//!
//! This backend implements the full store contract in process memory: a
//! hierarchical namespace shared by any number of sessions, versioned
//! conditional writes, one-shot watches, and ephemeral nodes which vanish
//! atomically when their owning session expires. It is the reference
//! backend of the repository and the substrate for every distributed
//! property test; `MemorySession::expire` simulates session loss exactly as
//! an external store would surface it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{CoordError, CoordResult};
use crate::paths::validate_path;
use crate::store::{CoordinationStore, Mode, NodeStat, WatchEvent};

/// A shared in-memory coordination namespace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// Create a new empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this namespace.
    pub fn session(&self) -> MemorySession {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let id = state.next_session;
        state.next_session += 1;
        state.live_sessions.insert(id);
        MemorySession { state: self.state.clone(), id }
    }
}

/// One session against a `MemoryStore` namespace.
pub struct MemorySession {
    state: Arc<Mutex<State>>,
    id: u64,
}

impl MemorySession {
    /// The id of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Expire this session.
    ///
    /// All ephemeral nodes owned by the session are removed atomically and
    /// their watches fired, after which every call through this handle
    /// fails with `SessionExpired`. Idempotent.
    pub fn expire(&self) {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        if !state.live_sessions.remove(&self.id) {
            return;
        }
        let owned: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(self.id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            state.nodes.remove(&path);
            state.fire(&path, WatchEvent::Deleted);
            if let Some(parent) = parent_path(&path) {
                let parent = parent.to_string();
                state.fire(&parent, WatchEvent::ChildrenChanged);
            }
        }
        tracing::debug!(session = self.id, "memory store session expired");
    }

    fn locked(&self) -> CoordResult<std::sync::MutexGuard<'_, State>> {
        let state = self.state.lock().expect("memory store lock poisoned");
        if !state.live_sessions.contains(&self.id) {
            return Err(CoordError::SessionExpired);
        }
        Ok(state)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.expire();
    }
}

#[async_trait]
impl CoordinationStore for MemorySession {
    async fn create(&self, path: &str, data: &[u8], mode: Mode) -> CoordResult<()> {
        validate_path(path)?;
        let mut state = self.locked()?;
        if state.nodes.contains_key(path) {
            return Err(CoordError::AlreadyExists(path.to_string()));
        }
        if let Some(parent) = parent_path(path) {
            let parent_node = state.nodes.get(parent).ok_or_else(|| CoordError::NotFound(parent.to_string()))?;
            if parent_node.mode == Mode::Ephemeral {
                return Err(CoordError::Other(anyhow!("ephemeral node '{}' can not have children", parent)));
            }
        }
        let owner = match mode {
            Mode::Persistent => None,
            Mode::Ephemeral => Some(self.id),
        };
        state.nodes.insert(path.to_string(), Node { data: data.to_vec(), version: 0, mode, owner });
        state.fire(path, WatchEvent::DataChanged);
        if let Some(parent) = parent_path(path) {
            let parent = parent.to_string();
            state.fire(&parent, WatchEvent::ChildrenChanged);
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> CoordResult<Option<NodeStat>> {
        let state = self.locked()?;
        Ok(state.nodes.get(path).map(|node| NodeStat { version: node.version }))
    }

    async fn get(&self, path: &str) -> CoordResult<(Vec<u8>, u64)> {
        let state = self.locked()?;
        let node = state.nodes.get(path).ok_or_else(|| CoordError::NotFound(path.to_string()))?;
        Ok((node.data.clone(), node.version))
    }

    async fn set(&self, path: &str, data: &[u8], expected_version: u64) -> CoordResult<()> {
        let mut state = self.locked()?;
        let node = state.nodes.get_mut(path).ok_or_else(|| CoordError::NotFound(path.to_string()))?;
        if node.version != expected_version {
            return Err(CoordError::VersionConflict {
                path: path.to_string(),
                expected: expected_version,
                actual: node.version,
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        state.fire(path, WatchEvent::DataChanged);
        Ok(())
    }

    async fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let state = self.locked()?;
        if !state.nodes.contains_key(path) {
            return Err(CoordError::NotFound(path.to_string()));
        }
        Ok(state.children_of(path))
    }

    async fn delete(&self, path: &str, expected_version: Option<u64>) -> CoordResult<()> {
        let mut state = self.locked()?;
        let node = state.nodes.get(path).ok_or_else(|| CoordError::NotFound(path.to_string()))?;
        if let Some(expected) = expected_version {
            if node.version != expected {
                return Err(CoordError::VersionConflict {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        if !state.children_of(path).is_empty() {
            return Err(CoordError::Other(anyhow!("node '{}' still has children", path)));
        }
        state.nodes.remove(path);
        state.fire(path, WatchEvent::Deleted);
        if let Some(parent) = parent_path(path) {
            let parent = parent.to_string();
            state.fire(&parent, WatchEvent::ChildrenChanged);
        }
        Ok(())
    }

    async fn watch(&self, path: &str) -> CoordResult<oneshot::Receiver<WatchEvent>> {
        validate_path(path)?;
        let mut state = self.locked()?;
        let (tx, rx) = oneshot::channel();
        let senders = state.watches.entry(path.to_string()).or_default();
        senders.retain(|sender| !sender.is_closed());
        senders.push(tx);
        Ok(rx)
    }
}

/// The shared state of a memory store namespace.
#[derive(Default)]
struct State {
    /// All nodes of the namespace, keyed by full path.
    nodes: BTreeMap<String, Node>,
    /// Registered one-shot watches, keyed by full path.
    watches: HashMap<String, Vec<oneshot::Sender<WatchEvent>>>,
    /// The set of currently-live session ids.
    live_sessions: HashSet<u64>,
    /// The id to assign to the next opened session.
    next_session: u64,
}

impl State {
    /// Fire and consume all watches registered on the given path.
    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(senders) = self.watches.remove(path) {
            for sender in senders {
                // The receiver may already be gone; that is fine.
                let _ = sender.send(event);
            }
        }
    }

    /// Collect the names of all direct children of the given path.
    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                if rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect()
    }
}

/// One node of the namespace.
struct Node {
    data: Vec<u8>,
    version: u64,
    mode: Mode,
    /// The owning session id for ephemeral nodes.
    owner: Option<u64>,
}

/// The parent path of the given path, or `None` for top-level nodes.
fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}
