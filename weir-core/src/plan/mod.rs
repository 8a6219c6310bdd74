//! The plan data model.
//!
//! A plan describes one data-flow job of the cluster: the feed its tuples
//! come from, the operator tree they are routed through, and the scheduling
//! bounds the cluster must respect while executing it. Plan identity is the
//! plan name. Plans are only ever mutated through the plan repository's
//! version-checked update.


use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths::validate_segment;

/// A data-flow job executed cooperatively by the worker cluster.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Plan {
    /// The unique name of this plan, used as its repository key.
    pub name: String,
    /// The descriptor used to locate the plan's feed and its partitions.
    pub feed: FeedDescriptor,
    /// The declarative description of the plan's operator tree.
    #[serde(rename = "rootOperator")]
    pub root_operator: OperatorDescriptor,
    /// Whether this plan is disabled. Disabled plans are never scheduled.
    #[serde(default)]
    pub disabled: bool,
    /// The upper bound on the number of workers concurrently owning
    /// partitions of this plan. `0` means uncapped.
    #[serde(default, rename = "maxWorkers")]
    pub max_workers: u32,
}

impl Plan {
    /// Validate the structural requirements of this plan.
    pub fn validate(&self) -> Result<()> {
        validate_segment(&self.name).context("invalid plan name")?;
        Ok(())
    }

    /// Encode this plan as its canonical JSON payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("error serializing plan")
    }

    /// Decode a plan from its JSON payload.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("error deserializing plan")
    }
}

/// An opaque descriptor used by the feed provider to locate a feed and
/// enumerate its partitions.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct FeedDescriptor {
    /// The kind of feed, dispatched on by the feed provider.
    pub kind: String,
    /// Feed-specific configuration properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// A declarative description of one operator node and its children.
///
/// The tree shape is fixed for the lifetime of a plan version; changing it
/// requires a new plan version, never a live mutation.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct OperatorDescriptor {
    /// The kind of operator, dispatched on by the operator provider.
    pub kind: String,
    /// Operator-specific configuration properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Descriptors of this operator's children, in forwarding order.
    #[serde(default)]
    pub children: Vec<OperatorDescriptor>,
}
