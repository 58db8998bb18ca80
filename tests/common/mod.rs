#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use spire_agent_core::{
    AgentSvid, AttestationResult, Attestor, BoxError, BoxFuture, Catalog, Endpoints, Manager,
    PersistedState, Synchronizer, TrustBundle, TrustDomain,
};
use tokio_util::sync::CancellationToken;

pub const TRUST_DOMAIN: &str = "example.org";
pub const AGENT_ID: &str = "spiffe://example.org/spire/agent/test/node1";

fn params_for(uri: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, uri);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![SanType::URI(Ia5String::try_from(uri).unwrap())];
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2034, 1, 1);
    params
}

/// Mints a CA plus an agent SVID issued by it.
pub fn attestation() -> AttestationResult {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = params_for("spiffe://example.org");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca_der = ca_params.self_signed(&ca_key).unwrap().der().to_vec();
    let issuer = Issuer::new(ca_params, ca_key);

    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = params_for(AGENT_ID);
    leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    let leaf_der = leaf_params
        .signed_by(&leaf_key, &issuer)
        .unwrap()
        .der()
        .to_vec();

    let trust_domain = TrustDomain::new(TRUST_DOMAIN).unwrap();
    AttestationResult {
        svid: AgentSvid::parse_from_der(&leaf_der, &leaf_key.serialize_der()).unwrap(),
        bundle: TrustBundle::parse_from_der(trust_domain, &ca_der).unwrap(),
    }
}

/// Ordered record of what collaborators observed.
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }
}

pub struct FakeCatalog {
    pub events: Events,
    pub fail: bool,
}

impl Catalog for FakeCatalog {
    fn run(&self) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            self.events.push("catalog.run");
            if self.fail {
                return Err("plugin failed to load".into());
            }
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.events.push("catalog.stop") })
    }
}

pub struct FakeAttestor {
    pub events: Events,
    pub result: AttestationResult,
    pub seen: Arc<Mutex<Option<PersistedState>>>,
}

impl Attestor for FakeAttestor {
    fn attest(
        &self,
        persisted: PersistedState,
    ) -> BoxFuture<'_, Result<AttestationResult, BoxError>> {
        Box::pin(async move {
            self.events.push("attest");
            *self.seen.lock().unwrap() = Some(persisted);
            Ok(self.result.clone())
        })
    }
}

pub struct FakeEndpoints {
    pub events: Events,
    pub fail_wait: bool,
}

impl Endpoints for FakeEndpoints {
    fn start(
        &self,
        _bundle: Arc<TrustBundle>,
        manager: Manager,
    ) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            assert!(manager.cache().is_empty());
            self.events.push("endpoints.start");
            Ok(())
        })
    }

    fn wait(&self, cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            if self.fail_wait {
                return Err("listener closed".into());
            }
            cancel.cancelled().await;
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.events.push("endpoints.shutdown") })
    }
}

pub struct FakeSynchronizer {
    pub events: Events,
    pub fail: bool,
}

impl Synchronizer for FakeSynchronizer {
    fn run(
        &self,
        _manager: Manager,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            if self.fail {
                return Err("renewal failed".into());
            }
            cancel.cancelled().await;
            self.events.push("synchronizer.cancelled");
            Ok(())
        })
    }
}
