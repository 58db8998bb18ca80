use std::sync::{Arc, OnceLock};

use rustls::crypto::CryptoProvider;

/// Returns the process-wide rustls provider used for trust-server TLS.
///
/// Built once and handed to every client config explicitly, so the agent
/// does not depend on (or install) a process default.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    Arc::clone(PROVIDER.get_or_init(|| Arc::new(rustls::crypto::ring::default_provider())))
}
