use crate::spiffe_id::TrustDomain;
use crate::BoxError;

use super::storage::StorageError;

/// Errors produced by the cache [`Manager`](super::Manager).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// `start` was called on a manager that is already running or has run.
    #[error("manager already started")]
    AlreadyStarted,

    /// A bundle was supplied for a trust domain other than the manager's.
    #[error("bundle trust domain mismatch: expected={expected}, actual={actual}")]
    TrustDomainMismatch {
        /// The manager's trust domain.
        expected: TrustDomain,
        /// The bundle's trust domain.
        actual: TrustDomain,
    },

    /// Persisting or loading agent state failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The renewal collaborator ended with an error.
    #[error("synchronizer failed")]
    Synchronizer(#[source] BoxError),
}
