#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

//! Core of a SPIFFE agent: it keeps workload identities fresh on behalf of
//! local workloads.
//!
//! Three pieces cooperate:
//!
//! - [`IdentityCache`] holds the X.509-SVIDs issued for each
//!   [`RegistrationEntry`], in rotation order.
//! - [`ConnectionPool`] keeps one mutually-authenticated renewal stream per
//!   workload identity open to the trust server.
//! - [`Agent`] sequences plugin startup, node attestation, the cache
//!   [`Manager`] and the local server, and tears everything down when any
//!   supervised task ends.
//!
//! ```no_run
//! use std::sync::Arc;
//! use spire_agent_core::{Agent, AgentConfig, Collaborators};
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::builder()
//!     .data_dir("/var/lib/spire-agent")
//!     .server_address("spire-server:8081")
//!     .trust_domain("example.org")
//!     .build()?;
//!
//! let agent = Arc::new(Agent::new(config, collaborators));
//! let runner = Arc::clone(&agent);
//! let run = tokio::spawn(async move { runner.run().await });
//!
//! // Later:
//! agent.shutdown();
//! run.await??;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **`logging`** (default): emit diagnostics through the `log` facade
//! - **`tracing`**: emit diagnostics as `tracing` events instead

pub(crate) mod observability;
pub(crate) mod prelude;

pub mod agent;
pub mod bundle;
pub mod cache;
pub mod cert;
pub mod constants;
pub mod manager;
pub mod pool;
pub mod selectors;
pub mod spiffe_id;
pub mod svid;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;
use std::pin::Pin;

/// Boxed error returned by collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future returned by object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use crate::{
    agent::{
        Agent, AgentConfig, AgentConfigBuilder, AgentError, AttestationResult, Attestor, Catalog,
        Collaborators, ConfigError, Endpoints, ManagerHandle, Phase, TaskGroup,
    },
    bundle::{BundleError, TrustBundle},
    cache::{CacheEntry, EntryKey, IdentityCache, RegistrationEntry},
    cert::{Certificate, PrivateKey},
    manager::{
        Manager, ManagerConfig, ManagerError, PersistedState, StatePaths, StorageError,
        Synchronizer,
    },
    pool::{ConnectionPool, PoolError, PooledConnection, TrustServerDialer},
    selectors::Selector,
    spiffe_id::{SpiffeId, SpiffeIdError, TrustDomain},
    svid::{AgentSvid, SvidError},
};
