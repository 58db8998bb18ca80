//! On-disk agent state: the trust bundle and the agent SVID chain, each as
//! concatenated DER. A missing file means "no state"; it is never an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::bundle::{BundleError, TrustBundle};
use crate::cert::error::CertificateError;
use crate::cert::{parse_chain, Certificate};
use crate::constants::{BUNDLE_CACHE_FILE, SVID_CACHE_FILE};
use crate::prelude::debug;
use crate::spiffe_id::TrustDomain;
use crate::svid::AgentSvid;

/// An error reading or writing persisted state.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The file exists but could not be read.
    #[error("failed to read {}", path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The file could not be written or moved into place.
    #[error("failed to write {}", path.display())]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The persisted bundle does not decode.
    #[error("corrupt bundle at {}", path.display())]
    CorruptBundle {
        /// File path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: BundleError,
    },

    /// The persisted SVID chain does not decode.
    #[error("corrupt SVID chain at {}", path.display())]
    CorruptSvid {
        /// File path.
        path: PathBuf,
        /// Decoding error.
        #[source]
        source: CertificateError,
    },
}

/// Locations of the persisted bundle and SVID chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    /// Trust bundle file.
    pub bundle: PathBuf,
    /// Agent SVID chain file.
    pub svid: PathBuf,
}

impl StatePaths {
    /// The standard file names under `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            bundle: data_dir.join(BUNDLE_CACHE_FILE),
            svid: data_dir.join(SVID_CACHE_FILE),
        }
    }

    /// Reads whatever state is on disk.
    ///
    /// # Errors
    ///
    /// Fails if a present file cannot be read or decoded.
    pub fn load(&self, trust_domain: &TrustDomain) -> Result<PersistedState, StorageError> {
        let bundle = read_optional(&self.bundle)?
            .map(|der| TrustBundle::parse_from_der(trust_domain.clone(), &der))
            .transpose()
            .map_err(|source| StorageError::CorruptBundle {
                path: self.bundle.clone(),
                source,
            })?;

        let svid_chain = read_optional(&self.svid)?
            .map(|der| parse_chain(&der))
            .transpose()
            .map_err(|source| StorageError::CorruptSvid {
                path: self.svid.clone(),
                source,
            })?;

        Ok(PersistedState { bundle, svid_chain })
    }

    /// Writes the bundle.
    ///
    /// # Errors
    ///
    /// [`StorageError::Write`] on I/O failure.
    pub fn store_bundle(&self, bundle: &TrustBundle) -> Result<(), StorageError> {
        write_atomic(&self.bundle, &bundle.to_der())
    }

    /// Writes the SVID chain. The private key is never persisted.
    ///
    /// # Errors
    ///
    /// [`StorageError::Write`] on I/O failure.
    pub fn store_svid(&self, svid: &AgentSvid) -> Result<(), StorageError> {
        write_atomic(&self.svid, &svid.chain_to_der())
    }
}

/// State recovered from a previous run, handed to the attestor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    /// The last trust bundle written, if any.
    pub bundle: Option<TrustBundle>,
    /// The last agent SVID chain written, if any.
    pub svid_chain: Option<Vec<Certificate>>,
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Read {
            path: path.to_owned(),
            source,
        }),
    }
}

// Readers never observe a half-written file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: path.to_owned(),
        source,
    };

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    debug!("Persisted agent state: path={}, bytes={}", path.display(), bytes.len());
    Ok(())
}
