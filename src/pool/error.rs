//! Errors returned by the connection pool.

use crate::BoxError;

/// An error establishing connections to the trust server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The authenticated connection could not be established. The pool is unchanged.
    #[error("failed to dial trust server")]
    Dial(#[source] BoxError),

    /// A renewal stream could not be opened. Nothing from the call was registered.
    #[error("failed to open renewal stream: identity={identity}")]
    StreamOpen {
        /// Identity whose stream failed to open.
        identity: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },
}
