//! The cache manager: owns the identity cache and the trust-server
//! connection pool, persists agent state and runs the renewal collaborator.
//!
//! A [`Manager`] is a cheap handle; clones share one instance. After
//! [`Manager::start`] a background task runs until [`Manager::shutdown`] or
//! until the synchronizer ends. On the way out the task closes every pooled
//! connection, flushes state to disk, records its terminal error and signals
//! [`Manager::stopped`].

mod config;
mod error;
mod storage;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use storage::{PersistedState, StatePaths, StorageError};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bundle::TrustBundle;
use crate::cache::IdentityCache;
use crate::pool::{ConnectionPool, PoolError, TrustServerDialer};
use crate::prelude::{debug, error, info, warn};
use crate::svid::AgentSvid;
use crate::{BoxError, BoxFuture};

/// Drives SVID renewal on behalf of the manager.
///
/// Implementations typically fetch registration entries, call
/// [`Manager::establish_connection`] and populate [`Manager::cache`]. `run`
/// must return once `cancel` fires; the manager does not drop it early. Any
/// return stops the manager, and an error becomes its terminal error.
pub trait Synchronizer: Send + Sync + 'static {
    /// Runs until cancelled or failed.
    fn run(&self, manager: Manager, cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>>;
}

/// Handle to a running (or runnable) cache manager.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    cache: IdentityCache,
    pool: ConnectionPool<TrustServerDialer>,
    svid: ArcSwap<AgentSvid>,
    bundle: Arc<ArcSwap<TrustBundle>>,
    paths: StatePaths,
    synchronizer: Option<Arc<dyn Synchronizer>>,
    cancel: CancellationToken,
    started: AtomicBool,
    stopped: watch::Sender<bool>,
    error: Mutex<Option<ManagerError>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("spiffe_id", self.inner.svid.load().spiffe_id())
            .field("started", &self.inner.started.load(Ordering::Acquire))
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Creates a manager. Nothing runs until [`Manager::start`].
    pub fn new(config: ManagerConfig) -> Self {
        let ManagerConfig {
            svid,
            bundle,
            server_address,
            paths,
            synchronizer,
        } = config;

        let server_id = bundle.trust_domain().server_id();
        let bundle = Arc::new(ArcSwap::from_pointee(bundle));
        let dialer = TrustServerDialer::new(server_address, server_id, Arc::clone(&bundle));

        Self {
            inner: Arc::new(Inner {
                cache: IdentityCache::new(),
                pool: ConnectionPool::new(dialer),
                svid: ArcSwap::from_pointee(svid),
                bundle,
                paths,
                synchronizer,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                stopped: watch::Sender::new(false),
                error: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Persists the initial state and spawns the manager task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ManagerError::AlreadyStarted`] on a second call, or
    /// [`ManagerError::Storage`] if the initial state cannot be written. A
    /// manager that failed to persist is left stopped.
    pub fn start(&self) -> Result<(), ManagerError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ManagerError::AlreadyStarted);
        }

        if let Err(e) = self.persist() {
            self.inner.stopped.send_replace(true);
            return Err(e);
        }

        let handle = tokio::spawn(run(self.clone()));
        *self.inner.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(
            "Manager started: spiffe_id={}",
            self.inner.svid.load().spiffe_id()
        );
        Ok(())
    }

    /// Resolves once the manager task has finished.
    ///
    /// A manager that was never started resolves only after [`Manager::shutdown`].
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Returns `true` once the manager task has finished.
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Takes the terminal error, if the manager ended with one.
    pub fn take_error(&self) -> Option<ManagerError> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stops the manager task and waits for it to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handle = self.take_task();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!("Error joining manager task during shutdown: error={e}");
                    self.inner.stopped.send_replace(true);
                }
            }
            // Never started, or another caller is already joining.
            None if !self.inner.started.load(Ordering::Acquire) => {
                self.inner.stopped.send_replace(true);
            }
            None => self.stopped().await,
        }
    }

    /// Like [`Manager::shutdown`], aborting the task after `timeout`.
    ///
    /// Returns `false` if the task had to be aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Manager shutdown timeout exceeded; aborting task");
                if let Some(handle) = self.take_task() {
                    handle.abort();
                }
                self.inner.pool.close_all();
                self.inner.stopped.send_replace(true);
                false
            }
        }
    }

    /// The identity cache.
    pub fn cache(&self) -> &IdentityCache {
        &self.inner.cache
    }

    /// The trust-server connection pool.
    pub fn pool(&self) -> &ConnectionPool<TrustServerDialer> {
        &self.inner.pool
    }

    /// The current agent SVID.
    pub fn svid(&self) -> Arc<AgentSvid> {
        self.inner.svid.load_full()
    }

    /// The current trust bundle.
    pub fn bundle(&self) -> Arc<TrustBundle> {
        self.inner.bundle.load_full()
    }

    /// Dials the trust server once with the current agent SVID and opens one
    /// renewal stream per identity.
    ///
    /// # Errors
    ///
    /// See [`ConnectionPool::establish_connection`].
    pub async fn establish_connection(&self, identities: &[String]) -> Result<(), PoolError> {
        let svid = self.svid();
        self.inner.pool.establish_connection(identities, &svid).await
    }

    /// Replaces the agent SVID and persists its chain.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Storage`] if the chain cannot be written; the new SVID
    /// is in effect regardless.
    pub fn rotate_svid(&self, svid: AgentSvid) -> Result<(), ManagerError> {
        info!("Rotating agent SVID: spiffe_id={}", svid.spiffe_id());
        self.inner.svid.store(Arc::new(svid));
        self.inner.paths.store_svid(&self.inner.svid.load())?;
        Ok(())
    }

    /// Replaces the trust bundle and persists it. The next dial verifies
    /// against the new bundle.
    ///
    /// # Errors
    ///
    /// [`ManagerError::TrustDomainMismatch`] for a foreign bundle (nothing
    /// changes), or [`ManagerError::Storage`] if it cannot be written.
    pub fn update_bundle(&self, bundle: TrustBundle) -> Result<(), ManagerError> {
        let current = self.inner.bundle.load();
        if bundle.trust_domain() != current.trust_domain() {
            return Err(ManagerError::TrustDomainMismatch {
                expected: current.trust_domain().clone(),
                actual: bundle.trust_domain().clone(),
            });
        }
        debug!(
            "Updating trust bundle: authorities={}",
            bundle.authorities().len()
        );
        self.inner.bundle.store(Arc::new(bundle));
        self.inner.paths.store_bundle(&self.inner.bundle.load())?;
        Ok(())
    }

    /// Returns `true` if both handles refer to the same manager.
    pub fn same_instance(&self, other: &Manager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn persist(&self) -> Result<(), ManagerError> {
        self.inner.paths.store_bundle(&self.inner.bundle.load())?;
        self.inner.paths.store_svid(&self.inner.svid.load())?;
        Ok(())
    }
}

async fn run(manager: Manager) {
    let cancel = manager.inner.cancel.clone();

    let result = match manager.inner.synchronizer.clone() {
        Some(sync) => sync
            .run(manager.clone(), cancel.clone())
            .await
            .map_err(ManagerError::Synchronizer),
        None => {
            cancel.cancelled().await;
            Ok(())
        }
    };

    manager.inner.pool.close_all();
    let flushed = manager.persist();

    let terminal = match (result, flushed) {
        (Err(e), flushed) => {
            if let Err(flush_err) = flushed {
                warn!("Failed to flush agent state: error={flush_err}");
            }
            Some(e)
        }
        (Ok(()), Err(flush_err)) => Some(flush_err),
        (Ok(()), Ok(())) => None,
    };

    match &terminal {
        Some(e) => error!("Manager stopped with error: error={e}"),
        None => info!("Manager stopped"),
    }
    *manager
        .inner
        .error
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = terminal;
    manager.inner.stopped.send_replace(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiffe_id::TrustDomain;
    use crate::test_support::TestCa;
    use std::path::Path;

    struct Fixture {
        ca: TestCa,
        svid: AgentSvid,
        bundle: TrustBundle,
    }

    fn fixture() -> Fixture {
        let ca = TestCa::new("spiffe://example.org");
        let (leaf, key) = ca.issue("spiffe://example.org/spire/agent/test/node1", 2030);
        let svid = AgentSvid::parse_from_der(&leaf, &key).unwrap();
        let td = TrustDomain::new("example.org").unwrap();
        let bundle = TrustBundle::parse_from_der(td, &ca.der).unwrap();
        Fixture { ca, svid, bundle }
    }

    fn manager(f: &Fixture, dir: &Path) -> Manager {
        Manager::new(ManagerConfig::new(
            f.svid.clone(),
            f.bundle.clone(),
            "127.0.0.1:8081",
            dir,
        ))
    }

    struct FailingSync;

    impl Synchronizer for FailingSync {
        fn run(&self, _m: Manager, _c: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { Err("renewal broke".into()) })
        }
    }

    struct IdleSync;

    impl Synchronizer for IdleSync {
        fn run(&self, _m: Manager, cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn start_persists_state_and_shutdown_stops() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        let m = manager(&f, dir.path());

        m.start().unwrap();
        assert_eq!(std::fs::read(dir.path().join("bundle.der")).unwrap(), f.ca.der);
        assert!(dir.path().join("agent_svid.der").exists());
        assert!(!m.is_stopped());

        m.shutdown().await;
        assert!(m.is_stopped());
        assert!(m.take_error().is_none());

        // Idempotent.
        m.shutdown().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&fixture(), dir.path());

        m.start().unwrap();
        assert!(matches!(m.start(), Err(ManagerError::AlreadyStarted)));
        m.shutdown().await;
    }

    #[tokio::test]
    async fn synchronizer_error_becomes_terminal_error() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        let m = Manager::new(
            ManagerConfig::new(f.svid.clone(), f.bundle.clone(), "127.0.0.1:8081", dir.path())
                .with_synchronizer(Arc::new(FailingSync)),
        );

        m.start().unwrap();
        m.stopped().await;

        assert!(matches!(m.take_error(), Some(ManagerError::Synchronizer(_))));
        assert!(m.take_error().is_none());
    }

    #[tokio::test]
    async fn cooperative_synchronizer_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        let m = Manager::new(
            ManagerConfig::new(f.svid.clone(), f.bundle.clone(), "127.0.0.1:8081", dir.path())
                .with_synchronizer(Arc::new(IdleSync)),
        );

        m.start().unwrap();
        m.shutdown().await;
        assert!(m.take_error().is_none());
    }

    #[tokio::test]
    async fn failed_initial_persist_leaves_manager_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&fixture(), &dir.path().join("missing"));

        assert!(matches!(m.start(), Err(ManagerError::Storage(_))));
        assert!(m.is_stopped());
    }

    #[tokio::test]
    async fn unstarted_manager_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&fixture(), dir.path());
        m.shutdown().await;
        m.stopped().await;
    }

    #[test]
    fn foreign_bundle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(&fixture(), dir.path());
        let other = TestCa::new("spiffe://other.org");
        let foreign =
            TrustBundle::parse_from_der(TrustDomain::new("other.org").unwrap(), &other.der)
                .unwrap();

        assert!(matches!(
            m.update_bundle(foreign),
            Err(ManagerError::TrustDomainMismatch { .. })
        ));
        assert_eq!(m.bundle().trust_domain().as_ref(), "example.org");
    }

    #[test]
    fn rotation_persists_new_chain() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        let m = manager(&f, dir.path());
        let (leaf, key) = f.ca.issue("spiffe://example.org/spire/agent/test/node1", 2031);
        let rotated = AgentSvid::parse_from_der(&leaf, &key).unwrap();

        m.rotate_svid(rotated.clone()).unwrap();

        assert_eq!(*m.svid(), rotated);
        assert_eq!(std::fs::read(dir.path().join("agent_svid.der")).unwrap(), leaf);
    }

    #[tokio::test]
    async fn dial_failure_surfaces_as_pool_error() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let f = fixture();
        let m = Manager::new(ManagerConfig::new(f.svid.clone(), f.bundle.clone(), address, dir.path()));
        let err = m
            .establish_connection(&["spiffe://example.org/web".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Dial(_)));
        assert!(m.pool().is_empty());
    }
}
