//! Collaborators the agent drives but does not implement.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bundle::TrustBundle;
use crate::manager::{Manager, PersistedState, Synchronizer};
use crate::svid::AgentSvid;
use crate::{BoxError, BoxFuture};

/// The plugin host.
pub trait Catalog: Send + Sync + 'static {
    /// Loads and starts plugins. The agent proceeds once this returns.
    fn run(&self) -> BoxFuture<'_, Result<(), BoxError>>;

    /// Stops plugins. Called once during teardown if `run` succeeded.
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// What node attestation yields.
#[derive(Debug, Clone)]
pub struct AttestationResult {
    /// The agent's SVID.
    pub svid: AgentSvid,
    /// The trust bundle of the agent's trust domain.
    pub bundle: TrustBundle,
}

/// Performs node attestation against the trust server.
pub trait Attestor: Send + Sync + 'static {
    /// Attests, optionally reusing state persisted by a previous run.
    fn attest(&self, persisted: PersistedState)
        -> BoxFuture<'_, Result<AttestationResult, BoxError>>;
}

/// The local workload-facing server.
///
/// It reads identities from [`Manager::cache`].
pub trait Endpoints: Send + Sync + 'static {
    /// Starts serving.
    fn start(&self, bundle: Arc<TrustBundle>, manager: Manager)
        -> BoxFuture<'_, Result<(), BoxError>>;

    /// Blocks while serving. Should return once `cancel` fires.
    fn wait(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>>;

    /// Stops serving. Called once during teardown if `start` succeeded.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// The collaborators an [`Agent`](super::Agent) sequences.
#[derive(Clone)]
pub struct Collaborators {
    /// Plugin host.
    pub catalog: Arc<dyn Catalog>,
    /// Node attestor.
    pub attestor: Arc<dyn Attestor>,
    /// Local server.
    pub endpoints: Arc<dyn Endpoints>,
    /// Renewal driver handed to the manager.
    pub synchronizer: Option<Arc<dyn Synchronizer>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("synchronizer", &self.synchronizer.is_some())
            .finish_non_exhaustive()
    }
}
