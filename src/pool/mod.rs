//! Pool of authenticated renewal streams to the trust server.
//!
//! The pool holds at most one [`PooledConnection`] per workload identity.
//! Registering an identity again closes the previous connection and stream
//! before the new pair becomes visible. Dialing and stream opening happen
//! outside the pool lock; only map mutation is locked.

mod codec;
mod crypto;
mod dialer;
mod error;
mod verifier;

pub use dialer::{GrpcConnection, RenewalStream, TrustServerDialer};
pub use error::PoolError;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::prelude::{debug, info, warn};
use crate::svid::AgentSvid;
use crate::BoxError;

/// The request-sending half of a bidirectional stream that can be half-closed.
pub trait DuplexStream: Send + Sync + 'static {
    /// Signals end of requests. Later calls are no-ops.
    fn close_send(&self);
}

/// An authenticated connection to the trust server.
///
/// Handles are cheap clones of one underlying connection, so several
/// identities registered by one call share it.
pub trait TrustConnection: Clone + Send + Sync + 'static {
    /// Stream type opened on this connection.
    type Stream: DuplexStream;

    /// Opens one renewal stream.
    fn open_stream(&self) -> impl Future<Output = Result<Self::Stream, BoxError>> + Send;

    /// Releases this handle.
    fn close(self);
}

/// Establishes authenticated connections to the trust server.
pub trait Dialer: Send + Sync + 'static {
    /// Connection type produced by [`Dialer::dial`].
    type Connection: TrustConnection;

    /// Dials the trust server presenting `svid` as the client identity.
    fn dial(
        &self,
        svid: &AgentSvid,
    ) -> impl Future<Output = Result<Self::Connection, BoxError>> + Send;
}

/// A connection handle paired with the stream opened on it for one identity.
pub struct PooledConnection<C: TrustConnection> {
    connection: C,
    stream: Arc<C::Stream>,
}

impl<C: TrustConnection> PooledConnection<C> {
    /// Returns the connection handle.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Returns the renewal stream.
    pub fn stream(&self) -> &Arc<C::Stream> {
        &self.stream
    }

    // Half-close first so the server sees end-of-requests before the transport goes away.
    fn close(self) {
        self.stream.close_send();
        self.connection.close();
    }
}

impl<C: TrustConnection> Clone for PooledConnection<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            stream: Arc::clone(&self.stream),
        }
    }
}

impl<C: TrustConnection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

type Entries<C> = HashMap<String, PooledConnection<C>>;

/// Identity → connection map backed by a [`Dialer`].
pub struct ConnectionPool<D: Dialer> {
    dialer: D,
    entries: Mutex<Entries<D::Connection>>,
}

impl<D: Dialer> fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> ConnectionPool<D> {
    /// Creates an empty pool.
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<D::Connection>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dials once and registers one stream per identity on the new connection.
    ///
    /// Either every identity is registered or none is: if any stream fails to
    /// open, the streams already opened by this call are half-closed and the
    /// connection is released.
    ///
    /// # Errors
    ///
    /// [`PoolError::Dial`] if the connection cannot be established,
    /// [`PoolError::StreamOpen`] if a stream cannot be opened.
    pub async fn establish_connection(
        &self,
        identities: &[String],
        local_svid: &AgentSvid,
    ) -> Result<(), PoolError> {
        if identities.is_empty() {
            debug!("No identities to connect; skipping dial");
            return Ok(());
        }

        let connection = self
            .dialer
            .dial(local_svid)
            .await
            .map_err(PoolError::Dial)?;

        let mut opened = Vec::with_capacity(identities.len());
        for identity in identities {
            match connection.open_stream().await {
                Ok(stream) => opened.push((identity.clone(), stream)),
                Err(source) => {
                    warn!(
                        "Renewal stream failed; rolling back: identity={identity}, opened={}",
                        opened.len()
                    );
                    for (_, stream) in &opened {
                        stream.close_send();
                    }
                    connection.close();
                    return Err(PoolError::StreamOpen {
                        identity: identity.clone(),
                        source,
                    });
                }
            }
        }

        for (identity, stream) in opened {
            self.register(identity, connection.clone(), stream);
        }
        info!(
            "Trust server connection established: identities={}",
            identities.len()
        );
        Ok(())
    }

    /// Installs `connection`/`stream` for `identity`, closing any previous pair first.
    pub fn register(
        &self,
        identity: impl Into<String>,
        connection: D::Connection,
        stream: <D::Connection as TrustConnection>::Stream,
    ) {
        let identity = identity.into();
        let mut entries = self.lock();
        if let Some(stale) = entries.remove(&identity) {
            debug!("Replacing pooled connection: identity={identity}");
            stale.close();
        }
        entries.insert(
            identity,
            PooledConnection {
                connection,
                stream: Arc::new(stream),
            },
        );
    }

    /// Returns the pair registered for `identity`, if any.
    pub fn lookup(&self, identity: &str) -> Option<PooledConnection<D::Connection>> {
        self.lock().get(identity).cloned()
    }

    /// Closes and forgets the pair for `identity`; returns whether one existed.
    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.lock().remove(identity);
        removed.map(PooledConnection::close).is_some()
    }

    /// Closes every registered pair exactly once and empties the pool.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        debug!("Closing pooled connections: count={}", drained.len());
        for (_, pooled) in drained {
            pooled.close();
        }
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no identity is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
