//! DER parsing helpers shared by certificates, chains and bundles.

use x509_parser::certificate::X509Certificate;
use x509_parser::error::X509Error;
use x509_parser::extensions::GeneralName;
use x509_parser::nom::Err;

use crate::cert::error::CertificateError;
use crate::SpiffeId;

/// Upper bound on a certificate chain presented by an SVID.
pub(crate) const MAX_CHAIN_LENGTH: usize = 16;

pub(crate) fn parse_x509(der: &[u8]) -> Result<(&[u8], X509Certificate<'_>), CertificateError> {
    x509_parser::parse_x509_certificate(der).map_err(|e| match e {
        Err::Incomplete(_) => CertificateError::ParseX509Certificate(X509Error::InvalidCertificate),
        Err::Error(err) | Err::Failure(err) => CertificateError::ParseX509Certificate(err),
    })
}

/// Splits concatenated DER certificates into their individual encodings.
///
/// `max` bounds the number of certificates accepted; bundles pass `None`.
pub(crate) fn split_der_certificates(
    concatenated: &[u8],
    max: Option<usize>,
) -> Result<Vec<&[u8]>, CertificateError> {
    let mut rest = concatenated;
    let mut out = Vec::new();

    while !rest.is_empty() {
        if let Some(max) = max {
            if out.len() >= max {
                return Err(CertificateError::TooManyCertificates { max });
            }
        }
        let (next, _) = parse_x509(rest)?;
        let (der, _) = rest.split_at(rest.len() - next.len());
        out.push(der);
        rest = next;
    }

    Ok(out)
}

pub(crate) fn single_spiffe_id(cert: &X509Certificate<'_>) -> Result<SpiffeId, CertificateError> {
    let san = cert
        .subject_alternative_name()
        .map_err(CertificateError::ParseX509Certificate)?
        .ok_or(CertificateError::MissingSpiffeId)?;

    let mut ids = san.value.general_names.iter().filter_map(|name| match name {
        GeneralName::URI(uri) if uri.starts_with("spiffe://") => Some(*uri),
        _ => None,
    });

    let first = ids.next().ok_or(CertificateError::MissingSpiffeId)?;
    if ids.next().is_some() {
        return Err(CertificateError::MultipleSpiffeIds);
    }
    Ok(SpiffeId::new(first)?)
}
