//! `Certificate` and `PrivateKey` wrappers over validated DER bytes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pkcs8::PrivateKeyInfo;
use zeroize::Zeroize;

use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::parsing::{parse_x509, single_spiffe_id, split_der_certificates};
use crate::SpiffeId;

pub mod error;
pub(crate) mod parsing;

/// A single DER-encoded X.509 certificate.
///
/// The bytes are checked to parse as X.509 at construction, and the
/// expiration time is extracted once so it can be read without reparsing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Certificate {
    der: Vec<u8>,
    not_after: SystemTime,
}

impl Certificate {
    /// Returns the DER encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// Returns the certificate's `notAfter` instant.
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// Returns the single SPIFFE ID carried in the certificate's URI SAN.
    ///
    /// # Errors
    ///
    /// [`CertificateError::MissingSpiffeId`] or [`CertificateError::MultipleSpiffeIds`]
    /// when the certificate does not carry exactly one SPIFFE ID.
    pub fn spiffe_id(&self) -> Result<SpiffeId, CertificateError> {
        let (_, x509) = parse_x509(&self.der)?;
        single_spiffe_id(&x509)
    }
}

impl AsRef<[u8]> for Certificate {
    fn as_ref(&self) -> &[u8] {
        &self.der
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = CertificateError;

    fn try_from(der: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(der.to_vec())
    }
}

impl TryFrom<Vec<u8>> for Certificate {
    type Error = CertificateError;

    fn try_from(der: Vec<u8>) -> Result<Self, Self::Error> {
        let (_, x509) = parse_x509(&der)?;
        let secs = x509.validity().not_after.timestamp();
        // Pre-epoch notAfter values clamp to the epoch; such a certificate is expired anyway.
        let not_after = UNIX_EPOCH + Duration::from_secs(u64::try_from(secs).unwrap_or(0));
        Ok(Self { der, not_after })
    }
}

/// Parses concatenated DER certificates forming an SVID chain, leaf first.
///
/// # Errors
///
/// Fails on an empty input, on undecodable bytes or on an overlong chain.
pub fn parse_chain(concatenated: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
    let certs = split_der_certificates(concatenated, Some(parsing::MAX_CHAIN_LENGTH))?
        .into_iter()
        .map(Certificate::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(CertificateError::Empty);
    }
    Ok(certs)
}

/// Concatenates the DER encodings of `certs`.
pub fn concat_der<'a>(certs: impl IntoIterator<Item = &'a Certificate>) -> Vec<u8> {
    certs
        .into_iter()
        .flat_map(|c| c.as_bytes().iter().copied())
        .collect()
}

/// A PKCS#8 DER-encoded private key. Zeroized on drop.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PrivateKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(bytes).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(bytes.to_vec()))
    }
}

impl TryFrom<Vec<u8>> for PrivateKey {
    type Error = PrivateKeyError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        PrivateKeyInfo::try_from(bytes.as_slice()).map_err(PrivateKeyError::DecodePkcs8)?;
        Ok(Self(bytes))
    }
}

// Never print key material.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.0.len())
            .finish()
    }
}
