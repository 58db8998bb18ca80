//! Errors for certificate and private key decoding.

use x509_parser::error::X509Error;

use crate::SpiffeIdError;

/// An error that may arise decoding an X.509 certificate or a certificate chain.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum CertificateError {
    /// The bytes are not a DER-encoded X.509 certificate.
    #[error("failed parsing X.509 certificate")]
    ParseX509Certificate(#[from] X509Error),

    /// A chain or bundle was expected to hold at least one certificate.
    #[error("no certificates found")]
    Empty,

    /// The chain holds more certificates than an SVID chain is allowed to.
    #[error("certificate chain is too long (max {max})")]
    TooManyCertificates {
        /// Upper bound on the chain length.
        max: usize,
    },

    /// The certificate carries no URI SAN holding a SPIFFE ID.
    #[error("certificate is missing SPIFFE ID in URI SAN")]
    MissingSpiffeId,

    /// The certificate carries more than one SPIFFE ID.
    #[error("certificate contains multiple SPIFFE IDs in URI SAN")]
    MultipleSpiffeIds,

    /// A `spiffe://` URI SAN failed to parse.
    #[error("failed to parse SPIFFE ID from URI SAN: {0}")]
    InvalidSpiffeId(#[from] SpiffeIdError),
}

/// An error that may arise decoding a private key.
#[derive(Debug, thiserror::Error, PartialEq)]
#[non_exhaustive]
pub enum PrivateKeyError {
    /// The bytes are not a PKCS#8 private key.
    #[error("failed decoding PKCS#8 private key")]
    DecodePkcs8(pkcs8::Error),
}
