//! Weir error abstractions.

use thiserror::Error;

/// Coordination error variants.
///
/// Losing a claim race is deliberately not represented here, as it is an
/// expected outcome surfaced as a `false` return from the assignment
/// registry, not an error.
#[derive(Debug, Error)]
pub enum CoordError {
    /// The target node already exists.
    #[error("node already exists: {0}")]
    AlreadyExists(String),
    /// The target node does not exist.
    #[error("node not found: {0}")]
    NotFound(String),
    /// A conditional write was attempted with a stale version.
    #[error("version conflict on {path}: expected {expected}, actual {actual}")]
    VersionConflict { path: String, expected: u64, actual: u64 },
    /// A plan of the given name already exists in the repository.
    #[error("plan already exists: {0}")]
    PlanExists(String),
    /// The worker id is already registered and has not been deregistered.
    #[error("worker already registered: {0}")]
    AlreadyRegistered(String),
    /// The coordination session backing this handle has expired.
    ///
    /// All ephemeral nodes created under the session are already gone. The
    /// affected worker must re-register and resume via the normal
    /// discover/claim flow.
    #[error("coordination session has expired")]
    SessionExpired,
    /// Any other error from the store backend or payload codecs.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A result type using `CoordError` as its error.
pub type CoordResult<T> = std::result::Result<T, CoordError>;
