//! Weir coordination core.
//!
//! This crate carries everything which must be shared between worker
//! processes and any tooling which administers a Weir cluster: the plan data
//! model, the coordination store abstraction along with its in-memory
//! backend, and the repositories/registries layered on top of the store.

pub mod assignments;
pub mod error;
pub mod paths;
pub mod plan;
pub mod plans;
#[cfg(test)]
mod plans_test;
pub mod store;
pub mod workers;

pub use assignments::{PartitionAssignmentRegistry, WorkerStatus};
pub use error::CoordError;
pub use paths::Namespace;
pub use plan::{FeedDescriptor, OperatorDescriptor, Plan};
pub use plans::PlanRepository;
pub use workers::WorkerRegistry;
