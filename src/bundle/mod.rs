//! The trust bundle: X.509 authorities the agent pins for its trust domain.

use crate::cert::error::CertificateError;
use crate::cert::parsing::split_der_certificates;
use crate::cert::{concat_der, Certificate};
use crate::spiffe_id::TrustDomain;

/// The X.509 authorities of a [`TrustDomain`].
///
/// The agent dials the trust server only if its chain verifies against these.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrustBundle {
    trust_domain: TrustDomain,
    authorities: Vec<Certificate>,
}

/// An error that can arise building a [`TrustBundle`].
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum BundleError {
    /// A bundle must carry at least one authority.
    #[error("bundle for trust domain {0} has no authorities")]
    NoAuthorities(TrustDomain),

    /// One of the authorities failed to decode.
    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl TrustBundle {
    /// Creates a bundle from decoded authorities.
    ///
    /// # Errors
    ///
    /// [`BundleError::NoAuthorities`] if `authorities` is empty.
    pub fn new(
        trust_domain: TrustDomain,
        authorities: Vec<Certificate>,
    ) -> Result<Self, BundleError> {
        if authorities.is_empty() {
            return Err(BundleError::NoAuthorities(trust_domain));
        }
        Ok(Self {
            trust_domain,
            authorities,
        })
    }

    /// Parses concatenated DER authorities, the on-disk bundle format.
    ///
    /// Bundles may legitimately hold many authorities, so no length bound applies.
    ///
    /// # Errors
    ///
    /// Fails if any authority is undecodable or none are present.
    pub fn parse_from_der(trust_domain: TrustDomain, der: &[u8]) -> Result<Self, BundleError> {
        let authorities = split_der_certificates(der, None)?
            .into_iter()
            .map(Certificate::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(trust_domain, authorities)
    }

    /// Returns the trust domain of the bundle.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Returns the authorities.
    pub fn authorities(&self) -> &[Certificate] {
        &self.authorities
    }

    /// Encodes the authorities as concatenated DER.
    pub fn to_der(&self) -> Vec<u8> {
        concat_der(&self.authorities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCa;

    fn td() -> TrustDomain {
        TrustDomain::new("example.org").unwrap()
    }

    #[test]
    fn parse_bundle_with_two_authorities() {
        let a = TestCa::new("spiffe://example.org");
        let b = TestCa::new("spiffe://example.org");
        let mut der = a.der.clone();
        der.extend_from_slice(&b.der);

        let bundle = TrustBundle::parse_from_der(td(), &der).unwrap();
        assert_eq!(bundle.authorities().len(), 2);
        assert_eq!(bundle.trust_domain(), &td());
        assert_eq!(bundle.to_der(), der);
    }

    #[test]
    fn empty_bundle_is_rejected() {
        assert_eq!(
            TrustBundle::parse_from_der(td(), &[]).unwrap_err(),
            BundleError::NoAuthorities(td())
        );
    }

    #[test]
    fn corrupt_bundle_is_rejected() {
        assert!(matches!(
            TrustBundle::parse_from_der(td(), b"\x30\x03abc"),
            Err(BundleError::Certificate(_))
        ));
    }
}
