//! Coordination namespace layout.
//!
//! All Weir state lives under a single configurable root:
//! - `<root>`: persistent root marker.
//! - `<root>/workers/<workerUuid>`: ephemeral, empty payload; presence is
//!   the liveness signal.
//! - `<root>/plans/<planName>`: persistent, payload is the serialized plan,
//!   node version is the plan's optimistic version counter.
//! - `<root>/plans/<planName>/<partitionId>`: ephemeral claim node, payload
//!   is a serialized `WorkerStatus`; presence is the ownership claim.

use anyhow::{bail, Result};

/// The default namespace root.
pub const DEFAULT_ROOT: &str = "/weir";

/// The name of the workers subtree.
const SEGMENT_WORKERS: &str = "workers";
/// The name of the plans subtree.
const SEGMENT_PLANS: &str = "plans";

/// Path builders for a Weir namespace rooted at a configurable base path.
#[derive(Clone, Debug)]
pub struct Namespace {
    root: String,
}

impl Namespace {
    /// Create a new namespace rooted at the given base path.
    pub fn new(root: &str) -> Result<Self> {
        validate_path(root)?;
        Ok(Self { root: root.to_string() })
    }

    /// The namespace root path.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The parent path of all worker liveness nodes.
    pub fn workers(&self) -> String {
        format!("{}/{}", self.root, SEGMENT_WORKERS)
    }

    /// The liveness node path of the given worker.
    pub fn worker(&self, worker_id: &str) -> String {
        format!("{}/{}/{}", self.root, SEGMENT_WORKERS, worker_id)
    }

    /// The parent path of all plan nodes.
    pub fn plans(&self) -> String {
        format!("{}/{}", self.root, SEGMENT_PLANS)
    }

    /// The node path of the given plan.
    pub fn plan(&self, plan_name: &str) -> String {
        format!("{}/{}/{}", self.root, SEGMENT_PLANS, plan_name)
    }

    /// The claim node path of the given plan partition.
    pub fn assignment(&self, plan_name: &str, partition_id: &str) -> String {
        format!("{}/{}/{}/{}", self.root, SEGMENT_PLANS, plan_name, partition_id)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self { root: DEFAULT_ROOT.to_string() }
    }
}

/// Validate a coordination store path.
pub fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        bail!("path must start with '/', got '{}'", path);
    }
    if path.len() < 2 || path.ends_with('/') {
        bail!("path must name a node and must not end with '/', got '{}'", path);
    }
    if path[1..].split('/').any(str::is_empty) {
        bail!("path must not contain empty segments, got '{}'", path);
    }
    Ok(())
}

/// Validate a single path segment, such as a plan name or partition id.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        bail!("path segment must not be empty");
    }
    if segment.contains('/') {
        bail!("path segment must not contain '/', got '{}'", segment);
    }
    Ok(())
}
