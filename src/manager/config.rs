use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::bundle::TrustBundle;
use crate::svid::AgentSvid;

use super::storage::StatePaths;
use super::Synchronizer;

/// Everything a [`Manager`](super::Manager) needs to start.
///
/// The trust domain is the bundle's; the expected server identity is
/// `spiffe://<trust domain>/spire/server`.
#[derive(Clone)]
pub struct ManagerConfig {
    /// Agent SVID obtained from attestation.
    pub svid: AgentSvid,
    /// Trust bundle obtained from attestation.
    pub bundle: TrustBundle,
    /// Trust server `host:port`.
    pub server_address: String,
    /// Where state is persisted.
    pub paths: StatePaths,
    /// Renewal collaborator, run until the manager stops.
    pub synchronizer: Option<Arc<dyn Synchronizer>>,
}

impl ManagerConfig {
    /// Creates a config persisting under `data_dir`, without a synchronizer.
    pub fn new(
        svid: AgentSvid,
        bundle: TrustBundle,
        server_address: impl Into<String>,
        data_dir: &Path,
    ) -> Self {
        Self {
            svid,
            bundle,
            server_address: server_address.into(),
            paths: StatePaths::in_dir(data_dir),
            synchronizer: None,
        }
    }

    /// Sets the renewal collaborator.
    #[must_use]
    pub fn with_synchronizer(mut self, synchronizer: Arc<dyn Synchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("spiffe_id", self.svid.spiffe_id())
            .field("trust_domain", self.bundle.trust_domain())
            .field("server_address", &self.server_address)
            .field("paths", &self.paths)
            .field("synchronizer", &self.synchronizer.is_some())
            .finish()
    }
}
