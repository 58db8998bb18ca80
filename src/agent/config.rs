use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::spiffe_id::TrustDomain;

use super::error::ConfigError;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Agent settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    data_dir: PathBuf,
    server_address: String,
    trust_domain: TrustDomain,
    shutdown_timeout: Option<Duration>,
}

impl AgentConfig {
    /// Starts building a config.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::new()
    }

    /// Directory holding persisted state.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Trust server `host:port`.
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// The agent's trust domain.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Upper bound on manager shutdown; `None` waits indefinitely.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout
    }
}

/// Builder for [`AgentConfig`].
///
/// # Example
///
/// ```
/// use spire_agent_core::AgentConfig;
///
/// let config = AgentConfig::builder()
///     .data_dir("/var/lib/spire-agent")
///     .server_address("spire-server:8081")
///     .trust_domain("example.org")
///     .build()
///     .unwrap();
/// assert_eq!(config.trust_domain().to_string(), "example.org");
/// ```
#[derive(Debug, Clone)]
pub struct AgentConfigBuilder {
    data_dir: Option<PathBuf>,
    server_address: Option<String>,
    trust_domain: Option<String>,
    shutdown_timeout: Option<Duration>,
}

impl Default for AgentConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentConfigBuilder {
    /// Creates a builder with a 30 second shutdown timeout.
    pub fn new() -> Self {
        Self {
            data_dir: None,
            server_address: None,
            trust_domain: None,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }

    /// Sets the directory holding persisted state. Required.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the trust server `host:port`. Required.
    #[must_use]
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.server_address = Some(address.into());
        self
    }

    /// Sets the trust domain, as a name or `spiffe://` ID. Required.
    #[must_use]
    pub fn trust_domain(mut self, trust_domain: impl Into<String>) -> Self {
        self.trust_domain = Some(trust_domain.into());
        self
    }

    /// Sets the manager shutdown timeout; `None` disables it.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validates and builds the config.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] for an unset required setting,
    /// [`ConfigError::InvalidTrustDomain`] for a malformed trust domain.
    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        let data_dir = self.data_dir.ok_or(ConfigError::Missing("data_dir"))?;
        let server_address = self
            .server_address
            .ok_or(ConfigError::Missing("server_address"))?;
        let trust_domain = self
            .trust_domain
            .ok_or(ConfigError::Missing("trust_domain"))?;
        let trust_domain =
            TrustDomain::new(&trust_domain).map_err(ConfigError::InvalidTrustDomain)?;

        Ok(AgentConfig {
            data_dir,
            server_address,
            trust_domain,
            shutdown_timeout: self.shutdown_timeout,
        })
    }
}
