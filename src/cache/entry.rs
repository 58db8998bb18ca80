//! Registration entries and the identity documents cached for them.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::cert::{Certificate, PrivateKey};
use crate::selectors::Selector;
use crate::spiffe_id::SpiffeId;

/// Describes a workload the agent obtains identities for.
///
/// Two entries with the same SPIFFE ID, parent ID and selector set (in any
/// order) map to the same [`EntryKey`]. Federation targets are carried along
/// but are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEntry {
    /// SPIFFE ID issued to matching workloads.
    pub spiffe_id: SpiffeId,
    /// SPIFFE ID of the entity that vouches for the workload.
    pub parent_id: SpiffeId,
    /// Selectors a workload must match.
    pub selectors: Vec<Selector>,
    /// Trust domains whose bundles the workload also receives.
    pub federates_with: Vec<String>,
}

/// Stable hex-encoded SHA-256 key derived from a [`RegistrationEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey(String);

impl EntryKey {
    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RegistrationEntry {
    /// Creates an entry without federation targets.
    pub fn new(spiffe_id: SpiffeId, parent_id: SpiffeId, selectors: Vec<Selector>) -> Self {
        Self {
            spiffe_id,
            parent_id,
            selectors,
            federates_with: Vec::new(),
        }
    }

    /// Derives the cache key.
    ///
    /// Selectors are hashed in (type, value) order so that their input order
    /// does not matter. Every field is length-prefixed.
    pub fn derive_key(&self) -> EntryKey {
        let mut selectors: Vec<&Selector> = self.selectors.iter().collect();
        selectors.sort();

        let mut hasher = Sha256::new();
        hash_len(&mut hasher, selectors.len());
        for s in selectors {
            hash_field(&mut hasher, s.r#type.as_bytes());
            hash_field(&mut hasher, s.value.as_bytes());
        }
        hash_field(&mut hasher, self.spiffe_id.to_string().as_bytes());
        hash_field(&mut hasher, self.parent_id.to_string().as_bytes());

        EntryKey(hex::encode(hasher.finalize()))
    }
}

fn hash_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hash_len(hasher, bytes.len());
    hasher.update(bytes);
}

/// An identity document: a workload's SVID, its key and federated bundles.
///
/// Immutable once built. The SVID expiration is read at construction.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    registration_entry: RegistrationEntry,
    svid: Certificate,
    private_key: PrivateKey,
    federated_bundles: HashMap<String, Vec<u8>>,
}

impl CacheEntry {
    /// Builds an identity document.
    pub fn new(
        registration_entry: RegistrationEntry,
        svid: Certificate,
        private_key: PrivateKey,
        federated_bundles: HashMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            registration_entry,
            svid,
            private_key,
            federated_bundles,
        }
    }

    /// Returns the registration entry this document was issued for.
    pub fn registration_entry(&self) -> &RegistrationEntry {
        &self.registration_entry
    }

    /// Returns the leaf SVID.
    pub fn svid(&self) -> &Certificate {
        &self.svid
    }

    /// Returns the SVID private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns federated bundles keyed by trust domain ID.
    pub fn federated_bundles(&self) -> &HashMap<String, Vec<u8>> {
        &self.federated_bundles
    }

    /// Returns the SVID's `notAfter`.
    pub fn not_after(&self) -> SystemTime {
        self.svid.not_after()
    }
}
