//! The agent's own X.509-SVID.

use crate::cert::error::{CertificateError, PrivateKeyError};
use crate::cert::{concat_der, parse_chain, Certificate, PrivateKey};
use crate::spiffe_id::SpiffeId;

/// The certificate chain and key the agent presents to the trust server.
///
/// The SPIFFE ID is taken from the leaf certificate, which comes first in the chain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AgentSvid {
    spiffe_id: SpiffeId,
    cert_chain: Vec<Certificate>,
    private_key: PrivateKey,
}

/// An error that may arise building an [`AgentSvid`].
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum SvidError {
    /// The chain could not be decoded or the leaf has no usable SPIFFE ID.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The key could not be decoded.
    #[error(transparent)]
    PrivateKey(#[from] PrivateKeyError),
}

impl AgentSvid {
    /// Builds an SVID from a concatenated DER chain and a PKCS#8 key.
    ///
    /// # Errors
    ///
    /// Returns [`SvidError`] if either input fails to decode.
    pub fn parse_from_der(cert_chain_der: &[u8], private_key_der: &[u8]) -> Result<Self, SvidError> {
        let cert_chain = parse_chain(cert_chain_der)?;
        let private_key = PrivateKey::try_from(private_key_der)?;
        Self::new(cert_chain, private_key)
    }

    /// Builds an SVID from decoded parts.
    ///
    /// # Errors
    ///
    /// Fails if the chain is empty or the leaf does not carry exactly one SPIFFE ID.
    pub fn new(cert_chain: Vec<Certificate>, private_key: PrivateKey) -> Result<Self, SvidError> {
        let leaf = cert_chain.first().ok_or(CertificateError::Empty)?;
        let spiffe_id = leaf.spiffe_id()?;
        Ok(Self {
            spiffe_id,
            cert_chain,
            private_key,
        })
    }

    /// Returns the SPIFFE ID of the leaf certificate.
    pub fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// Returns the full chain, leaf first.
    pub fn cert_chain(&self) -> &[Certificate] {
        &self.cert_chain
    }

    /// Returns the private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Encodes the chain as concatenated DER, the on-disk SVID format.
    pub fn chain_to_der(&self) -> Vec<u8> {
        concat_der(&self.cert_chain)
    }
}
