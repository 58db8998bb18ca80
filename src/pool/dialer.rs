//! gRPC over mutually-authenticated TLS to the trust server.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use bytes::Bytes;
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Request, Status, Streaming};
use tower::service_fn;

use crate::bundle::TrustBundle;
use crate::constants::FETCH_SVID_PATH;
use crate::pool::codec::BytesCodec;
use crate::pool::crypto::crypto_provider;
use crate::pool::verifier::SpiffeServerVerifier;
use crate::pool::{Dialer, DuplexStream, TrustConnection};
use crate::prelude::debug;
use crate::spiffe_id::SpiffeId;
use crate::svid::AgentSvid;
use crate::BoxError;

// The channel is driven by the custom connector; the URI only satisfies tonic.
const TONIC_DUMMY_URI: &str = "http://[::]:50051";

const OUTBOUND_BUFFER: usize = 16;

/// Dials the trust server at a `host:port` address.
///
/// The trust bundle is shared with the manager, so bundle updates apply to
/// the next dial without rebuilding the dialer.
#[derive(Debug, Clone)]
pub struct TrustServerDialer {
    address: String,
    server_id: SpiffeId,
    bundle: Arc<ArcSwap<TrustBundle>>,
}

impl TrustServerDialer {
    /// Creates a dialer for `address` expecting the server to present `server_id`.
    pub fn new(address: String, server_id: SpiffeId, bundle: Arc<ArcSwap<TrustBundle>>) -> Self {
        Self {
            address,
            server_id,
            bundle,
        }
    }

    fn tls_config(&self, svid: &AgentSvid) -> Result<ClientConfig, rustls::Error> {
        let provider = crypto_provider();
        let verifier = SpiffeServerVerifier::new(
            &self.bundle.load(),
            self.server_id.clone(),
            provider.signature_verification_algorithms,
        )?;

        let chain = svid
            .cert_chain()
            .iter()
            .map(|c| CertificateDer::from(c.as_bytes().to_vec()))
            .collect();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            svid.private_key().as_bytes().to_vec(),
        ));

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(chain, key)?;
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(config)
    }

    fn server_name(&self) -> Result<ServerName<'static>, BoxError> {
        // `host:port`, with IPv6 hosts in brackets.
        let host = self
            .address
            .rsplit_once(':')
            .map_or(self.address.as_str(), |(host, _)| host)
            .trim_start_matches('[')
            .trim_end_matches(']');
        Ok(ServerName::try_from(host.to_owned())?)
    }
}

impl Dialer for TrustServerDialer {
    type Connection = GrpcConnection;

    async fn dial(&self, svid: &AgentSvid) -> Result<GrpcConnection, BoxError> {
        let connector = TlsConnector::from(Arc::new(self.tls_config(svid)?));
        let server_name = self.server_name()?;
        let address = Arc::new(self.address.clone());

        debug!(
            "Dialing trust server: address={}, server_id={}",
            self.address, self.server_id
        );
        let channel = Endpoint::try_from(TONIC_DUMMY_URI)?
            .connect_with_connector(service_fn(move |_: Uri| {
                let connector = connector.clone();
                let server_name = server_name.clone();
                let address = Arc::clone(&address);
                async move {
                    let tcp = TcpStream::connect(address.as_str()).await?;
                    let tls = connector.connect(server_name, tcp).await?;
                    Ok::<_, std::io::Error>(TokioIo::new(tls))
                }
            }))
            .await?;

        Ok(GrpcConnection { channel })
    }
}

/// A handle to an HTTP/2 channel to the trust server.
#[derive(Debug, Clone)]
pub struct GrpcConnection {
    channel: Channel,
}

impl TrustConnection for GrpcConnection {
    type Stream = RenewalStream;

    async fn open_stream(&self) -> Result<RenewalStream, BoxError> {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready().await?;

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let response = grpc
            .streaming(
                Request::new(ReceiverStream::new(rx)),
                PathAndQuery::from_static(FETCH_SVID_PATH),
                BytesCodec,
            )
            .await?;

        Ok(RenewalStream {
            outbound: Mutex::new(Some(tx)),
            inbound: tokio::sync::Mutex::new(response.into_inner()),
        })
    }

    // The channel is shared by every identity dialed together; it shuts
    // down once the last handle is gone.
    fn close(self) {
        drop(self.channel);
    }
}

/// One bidirectional renewal call carrying opaque frames.
pub struct RenewalStream {
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound: tokio::sync::Mutex<Streaming<Bytes>>,
}

impl RenewalStream {
    /// Queues a request frame.
    ///
    /// # Errors
    ///
    /// A `cancelled` status once the request half is closed.
    pub async fn send(&self, frame: Bytes) -> Result<(), Status> {
        let tx = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Status::cancelled("request stream closed"))?;
        tx.send(frame)
            .await
            .map_err(|_| Status::cancelled("request stream closed"))
    }

    /// Receives the next response frame; `None` once the server ends the call.
    ///
    /// # Errors
    ///
    /// The status the server or transport ended the call with.
    pub async fn message(&self) -> Result<Option<Bytes>, Status> {
        self.inbound.lock().await.message().await
    }
}

impl DuplexStream for RenewalStream {
    fn close_send(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl fmt::Debug for RenewalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        f.debug_struct("RenewalStream")
            .field("send_open", &open)
            .finish_non_exhaustive()
    }
}
