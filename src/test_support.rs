//! Throwaway certificate minting for unit tests.

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};

fn params_for(uri: &str, expires_year: i32) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, uri);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::URI(Ia5String::try_from(uri).unwrap())];
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(expires_year, 1, 1);
    params
}

/// Mints a self-signed certificate; returns `(cert_der, pkcs8_key_der)`.
pub(crate) fn self_signed_cert(uri: &str, expires_year: i32) -> (Vec<u8>, Vec<u8>) {
    let key = KeyPair::generate().unwrap();
    let cert = params_for(uri, expires_year).self_signed(&key).unwrap();
    (cert.der().to_vec(), key.serialize_der())
}

/// A signing authority for a test trust domain.
pub(crate) struct TestCa {
    params: CertificateParams,
    key_der: Vec<u8>,
    pub(crate) der: Vec<u8>,
}

impl TestCa {
    pub(crate) fn new(trust_domain_id: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = params_for(trust_domain_id, 2034);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        Self {
            der: cert.der().to_vec(),
            key_der: key.serialize_der(),
            params,
        }
    }

    /// Issues a leaf for `uri`; returns `(cert_der, pkcs8_key_der)`.
    pub(crate) fn issue(&self, uri: &str, expires_year: i32) -> (Vec<u8>, Vec<u8>) {
        let ca_key = KeyPair::try_from(self.key_der.as_slice()).unwrap();
        let issuer = Issuer::new(self.params.clone(), ca_key);
        let key = KeyPair::generate().unwrap();
        let mut params = params_for(uri, expires_year);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        let cert = params.signed_by(&key, &issuer).unwrap();
        (cert.der().to_vec(), key.serialize_der())
    }
}
