//! rustls server verifier pinned to the agent's trust bundle and the server's SPIFFE ID.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::ParsedCertificate;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::bundle::TrustBundle;
use crate::cert::Certificate;
use crate::prelude::{debug, error};
use crate::spiffe_id::SpiffeId;

/// The verified failure reasons surfaced through `rustls::Error::Other`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum VerifyError {
    #[error("trust bundle has no usable authority")]
    NoRoots,
    #[error("server certificate does not carry a SPIFFE ID: {0}")]
    NoSpiffeId(#[source] crate::cert::error::CertificateError),
    #[error("unexpected server SPIFFE ID: expected={expected}, actual={actual}")]
    UnexpectedServerId { expected: SpiffeId, actual: SpiffeId },
}

fn other_err(e: VerifyError) -> rustls::Error {
    rustls::Error::Other(rustls::OtherError(Arc::new(e)))
}

/// Verifies the trust server chain against a pinned bundle and requires
/// the leaf's SPIFFE ID to equal the expected server ID.
///
/// DNS names are not checked: SPIFFE certificates authenticate by URI SAN.
pub(crate) struct SpiffeServerVerifier {
    roots: RootCertStore,
    expected: SpiffeId,
    algorithms: WebPkiSupportedAlgorithms,
}

impl SpiffeServerVerifier {
    pub(crate) fn new(
        bundle: &TrustBundle,
        expected: SpiffeId,
        algorithms: WebPkiSupportedAlgorithms,
    ) -> Result<Self, rustls::Error> {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(
            bundle
                .authorities()
                .iter()
                .map(|c| CertificateDer::from(c.as_bytes().to_vec())),
        );
        if added == 0 {
            return Err(other_err(VerifyError::NoRoots));
        }
        if ignored > 0 {
            debug!("Ignored unusable bundle authorities: count={ignored}");
        }
        Ok(Self {
            roots,
            expected,
            algorithms,
        })
    }
}

impl fmt::Debug for SpiffeServerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiffeServerVerifier")
            .field("expected", &self.expected)
            .field("roots", &self.roots.len())
            .finish()
    }
}

impl ServerCertVerifier for SpiffeServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let parsed = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &parsed,
            &self.roots,
            intermediates,
            now,
            self.algorithms.all,
        )?;

        // Authorize only after the chain is known to be genuine.
        let actual = Certificate::try_from(end_entity.as_ref())
            .and_then(|c| c.spiffe_id())
            .map_err(|e| other_err(VerifyError::NoSpiffeId(e)))?;
        if actual != self.expected {
            error!(
                "Trust server presented an unexpected identity: expected={}, actual={actual}",
                self.expected
            );
            return Err(other_err(VerifyError::UnexpectedServerId {
                expected: self.expected.clone(),
                actual,
            }));
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
