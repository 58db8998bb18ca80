//! The agent supervisor.
//!
//! [`Agent::run`] starts plugins, attests, starts the cache manager and the
//! local server, then supervises the local server and the manager in one
//! [`TaskGroup`]: whichever ends first ends the agent. Teardown always runs,
//! in order: local server, manager, plugins.

mod config;
mod error;
mod plugins;
mod task_group;

pub use config::{AgentConfig, AgentConfigBuilder};
pub use error::{AgentError, ConfigError};
pub use plugins::{AttestationResult, Attestor, Catalog, Collaborators, Endpoints};
pub use task_group::TaskGroup;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::bundle::TrustBundle;
use crate::manager::{Manager, ManagerConfig, ManagerError, StatePaths};
use crate::prelude::{debug, info, warn};
use crate::svid::AgentSvid;

/// Where an [`Agent`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Not yet running.
    Created,
    /// The plugin host is running.
    PluginsStarted,
    /// Node attestation succeeded.
    Attested,
    /// The cache manager is running.
    ManagerStarted,
    /// The local server is serving.
    EndpointsStarted,
    /// Supervising the local server and the manager.
    Running,
    /// Tearing down.
    ShuttingDown,
    /// Finished.
    Stopped,
}

/// Holds the current manager, if any.
///
/// Set once by a successful start and cleared once the manager's task has
/// ended, either on its own or through agent teardown.
#[derive(Debug, Clone, Default)]
pub struct ManagerHandle(Arc<Mutex<Option<Manager>>>);

impl ManagerHandle {
    fn lock(&self) -> MutexGuard<'_, Option<Manager>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current manager.
    pub fn get(&self) -> Option<Manager> {
        self.lock().clone()
    }

    fn clear(&self) -> Option<Manager> {
        self.lock().take()
    }

    // Leaves a newer manager installed by someone else in place.
    fn clear_if(&self, manager: &Manager) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|m| m.same_instance(manager)) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

/// The agent.
///
/// Share it behind an `Arc` to call [`Agent::shutdown`] while
/// [`Agent::run`] is in progress.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    collaborators: Collaborators,
    manager: ManagerHandle,
    plugins_started: AtomicBool,
    endpoints_started: AtomicBool,
    shutdown: CancellationToken,
    phase: watch::Sender<Phase>,
}

impl Agent {
    /// Creates an agent. Nothing runs until [`Agent::run`].
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            manager: ManagerHandle::default(),
            plugins_started: AtomicBool::new(false),
            endpoints_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            phase: watch::Sender::new(Phase::Created),
        }
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Subscribes to phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// The manager handle shared with the supervision task.
    pub fn manager(&self) -> &ManagerHandle {
        &self.manager
    }

    /// Requests shutdown. [`Agent::run`] tears down and returns.
    pub fn shutdown(&self) {
        info!("Agent shutdown requested");
        self.shutdown.cancel();
    }

    /// Runs the agent until shutdown or until a supervised task ends.
    ///
    /// # Errors
    ///
    /// The first error from startup or from a supervised task. Teardown runs
    /// on every path.
    pub async fn run(&self) -> Result<(), AgentError> {
        let result = self.run_until_done().await;
        self.teardown().await;
        self.set_phase(Phase::Stopped);
        match &result {
            Ok(()) => info!("Agent stopped"),
            Err(e) => warn!("Agent stopped with error: error={e}"),
        }
        result
    }

    async fn run_until_done(&self) -> Result<(), AgentError> {
        let collab = &self.collaborators;

        let Some(started) = self.unless_shutdown(collab.catalog.run()).await else {
            return Ok(());
        };
        started.map_err(AgentError::Plugins)?;
        self.plugins_started.store(true, Ordering::Release);
        self.set_phase(Phase::PluginsStarted);

        let persisted =
            StatePaths::in_dir(self.config.data_dir()).load(self.config.trust_domain())?;
        let Some(attested) = self.unless_shutdown(collab.attestor.attest(persisted)).await else {
            return Ok(());
        };
        let attested = attested.map_err(AgentError::Attestation)?;
        info!(
            "Node attestation succeeded: spiffe_id={}",
            attested.svid.spiffe_id()
        );
        self.set_phase(Phase::Attested);

        let manager = self.start_manager(attested.svid, attested.bundle)?;
        self.set_phase(Phase::ManagerStarted);

        let Some(served) = self
            .unless_shutdown(collab.endpoints.start(manager.bundle(), manager.clone()))
            .await
        else {
            return Ok(());
        };
        served.map_err(AgentError::Endpoints)?;
        self.endpoints_started.store(true, Ordering::Release);
        self.set_phase(Phase::EndpointsStarted);

        let mut group = TaskGroup::new(self.shutdown.child_token());
        let endpoints = Arc::clone(&collab.endpoints);
        group.spawn("endpoints", move |token| async move {
            endpoints.wait(token).await.map_err(AgentError::Endpoints)
        });
        let handle = self.manager.clone();
        group.spawn("manager-supervisor", move |token| {
            supervise_manager(handle, manager, token)
        });
        self.set_phase(Phase::Running);

        group.wait().await
    }

    /// Starts a manager for `svid`/`bundle` and installs it in the handle.
    ///
    /// # Errors
    ///
    /// [`AgentError::DoubleStart`] if a manager is already installed; the
    /// installed manager is left untouched. Otherwise any
    /// [`ManagerError`] from starting, in which case nothing is installed.
    pub fn start_manager(
        &self,
        svid: AgentSvid,
        bundle: TrustBundle,
    ) -> Result<Manager, AgentError> {
        let mut slot = self.manager.lock();
        if slot.is_some() {
            return Err(AgentError::DoubleStart);
        }

        if bundle.trust_domain() != self.config.trust_domain() {
            return Err(ManagerError::TrustDomainMismatch {
                expected: self.config.trust_domain().clone(),
                actual: bundle.trust_domain().clone(),
            }
            .into());
        }

        let mut config = ManagerConfig::new(
            svid,
            bundle,
            self.config.server_address(),
            self.config.data_dir(),
        );
        config.synchronizer = self.collaborators.synchronizer.clone();

        let manager = Manager::new(config);
        manager.start()?;
        *slot = Some(manager.clone());
        Ok(manager)
    }

    async fn teardown(&self) {
        self.set_phase(Phase::ShuttingDown);

        if self.endpoints_started.swap(false, Ordering::AcqRel) {
            debug!("Stopping local server");
            self.collaborators.endpoints.shutdown().await;
        }

        if let Some(manager) = self.manager.get() {
            debug!("Stopping manager");
            match self.config.shutdown_timeout() {
                Some(timeout) => {
                    manager.shutdown_with_timeout(timeout).await;
                }
                None => manager.shutdown().await,
            }
            self.manager.clear_if(&manager);
        }

        if self.plugins_started.swap(false, Ordering::AcqRel) {
            debug!("Stopping plugins");
            self.collaborators.catalog.stop().await;
        }
    }

    async fn unless_shutdown<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn set_phase(&self, phase: Phase) {
        debug!("Agent phase: {phase:?}");
        self.phase.send_replace(phase);
    }
}

// Works on its own clone of the manager, so the handle lock is only taken
// to clear it.
async fn supervise_manager(
    handle: ManagerHandle,
    manager: Manager,
    token: CancellationToken,
) -> Result<(), AgentError> {
    tokio::select! {
        () = manager.stopped() => {}
        () = token.cancelled() => return Ok(()),
    }

    let err = manager.take_error();
    handle.clear();
    match err {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCa;
    use crate::BoxError;
    use crate::BoxFuture;

    struct NoopCatalog;

    impl Catalog for NoopCatalog {
        fn run(&self) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { Ok(()) })
        }
        fn stop(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    struct NeverAttests;

    impl Attestor for NeverAttests {
        fn attest(
            &self,
            _persisted: crate::manager::PersistedState,
        ) -> BoxFuture<'_, Result<AttestationResult, BoxError>> {
            Box::pin(async { Err("not in this test".into()) })
        }
    }

    struct IdleEndpoints;

    impl Endpoints for IdleEndpoints {
        fn start(
            &self,
            _bundle: Arc<TrustBundle>,
            _manager: Manager,
        ) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async { Ok(()) })
        }
        fn wait(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>> {
            Box::pin(async move {
                cancel.cancelled().await;
                Ok(())
            })
        }
        fn shutdown(&self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn agent(dir: &std::path::Path) -> Agent {
        let config = AgentConfig::builder()
            .data_dir(dir)
            .server_address("127.0.0.1:8081")
            .trust_domain("example.org")
            .build()
            .unwrap();
        Agent::new(
            config,
            Collaborators {
                catalog: Arc::new(NoopCatalog),
                attestor: Arc::new(NeverAttests),
                endpoints: Arc::new(IdleEndpoints),
                synchronizer: None,
            },
        )
    }

    fn identity(ca: &TestCa) -> (AgentSvid, TrustBundle) {
        let (leaf, key) = ca.issue("spiffe://example.org/spire/agent/test/node1", 2030);
        let svid = AgentSvid::parse_from_der(&leaf, &key).unwrap();
        let bundle =
            TrustBundle::parse_from_der(crate::TrustDomain::new("example.org").unwrap(), &ca.der)
                .unwrap();
        (svid, bundle)
    }

    #[tokio::test]
    async fn second_manager_start_is_rejected_and_handle_kept() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let ca = TestCa::new("spiffe://example.org");

        let (svid, bundle) = identity(&ca);
        let first = agent.start_manager(svid, bundle).unwrap();

        let (svid, bundle) = identity(&ca);
        let err = agent.start_manager(svid, bundle).unwrap_err();
        assert!(matches!(err, AgentError::DoubleStart));

        let installed = agent.manager().get().unwrap();
        assert!(installed.same_instance(&first));
        first.shutdown().await;
    }

    #[tokio::test]
    async fn foreign_bundle_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let ca = TestCa::new("spiffe://example.org");
        let (svid, _) = identity(&ca);
        let other = TestCa::new("spiffe://other.org");
        let foreign =
            TrustBundle::parse_from_der(crate::TrustDomain::new("other.org").unwrap(), &other.der)
                .unwrap();

        let err = agent.start_manager(svid, foreign).unwrap_err();
        assert!(matches!(
            err,
            AgentError::Manager(ManagerError::TrustDomainMismatch { .. })
        ));
        assert!(agent.manager().get().is_none());
    }

    #[tokio::test]
    async fn supervisor_clears_handle_when_manager_stops() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let ca = TestCa::new("spiffe://example.org");
        let (svid, bundle) = identity(&ca);
        let manager = agent.start_manager(svid, bundle).unwrap();

        let supervisor = tokio::spawn(supervise_manager(
            agent.manager().clone(),
            manager.clone(),
            CancellationToken::new(),
        ));
        manager.shutdown().await;

        assert!(supervisor.await.unwrap().is_ok());
        assert!(agent.manager().get().is_none());
    }

    #[tokio::test]
    async fn teardown_clears_handle_and_allows_restart() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let ca = TestCa::new("spiffe://example.org");
        let (svid, bundle) = identity(&ca);
        let first = agent.start_manager(svid, bundle).unwrap();

        agent.teardown().await;
        assert!(first.is_stopped());
        assert!(agent.manager().get().is_none());

        let (svid, bundle) = identity(&ca);
        let second = agent.start_manager(svid, bundle).unwrap();
        assert!(!second.same_instance(&first));
        second.shutdown().await;
    }

    #[tokio::test]
    async fn handle_keeps_newer_manager() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let ca = TestCa::new("spiffe://example.org");
        let (svid, bundle) = identity(&ca);
        let first = agent.start_manager(svid, bundle).unwrap();
        first.shutdown().await;
        agent.manager().clear();

        let (svid, bundle) = identity(&ca);
        let second = agent.start_manager(svid, bundle).unwrap();
        assert!(!agent.manager().clear_if(&first));
        assert!(agent.manager().get().unwrap().same_instance(&second));
        second.shutdown().await;
    }

    #[tokio::test]
    async fn attestation_failure_stops_agent() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());

        let err = agent.run().await.unwrap_err();
        assert!(matches!(err, AgentError::Attestation(_)));
        assert_eq!(agent.phase(), Phase::Stopped);
        assert!(agent.manager().get().is_none());
    }
}
