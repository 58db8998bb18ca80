use tokio::task::JoinError;

use crate::manager::{ManagerError, StorageError};
use crate::spiffe_id::SpiffeIdError;
use crate::BoxError;

/// An invalid [`AgentConfig`](super::AgentConfig).
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// The trust domain does not parse.
    #[error("invalid trust domain")]
    InvalidTrustDomain(#[source] SpiffeIdError),
}

/// Why an [`Agent`](super::Agent) run ended with an error.
///
/// Task errors are propagated as returned; the first one wins.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    /// Persisted state could not be loaded.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The plugin host failed to start.
    #[error("failed to start plugins")]
    Plugins(#[source] BoxError),

    /// Node attestation failed.
    #[error("node attestation failed")]
    Attestation(#[source] BoxError),

    /// A manager is already installed.
    #[error("cannot start cache manager: a manager is already running")]
    DoubleStart,

    /// The manager failed to start or stopped with an error.
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// The local server failed.
    #[error("local server failed")]
    Endpoints(#[source] BoxError),

    /// A supervised task panicked or was aborted.
    #[error("supervised task failed")]
    Task(#[from] JoinError),
}
