// QUIC transport: the primary transport selected per spec §4.10.
//
// The teacher's `networking/transport/quic.rs` is a configuration-only
// placeholder with no real QUIC backend. This is new code, grounded on the
// `quinn`-based transport in `other_examples/…quic_transport.rs` (a
// self-signed-certificate QUIC peer-to-peer transport) and on the teacher's
// own `security/certificates.rs` comment naming `rcgen` for certificate
// generation. Peer authenticity is established by the Xelvra handshake
// above this layer (the identity's Ed25519 keypair), not by the TLS
// certificate chain, so the client accepts any server certificate — the
// same trust model the grounding example uses.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint, ServerConfig};

use crate::error::{NodeError, Result};
use crate::identity::PeerId;
use crate::net::transport::metrics::{MetricsRecorder, TransportMetrics};
use crate::net::transport::{Connection, Stream, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ALPN: &[u8] = b"xelvra/1.0.0";

pub struct QuicConfig {
    pub bind_addr: SocketAddr,
    pub connect_timeout: Duration,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

pub struct QuicTransport {
    endpoint: Endpoint,
    config: QuicConfig,
    metrics: Arc<MetricsRecorder>,
}

impl QuicTransport {
    pub fn bind(config: QuicConfig) -> Result<Self> {
        let (server_config, _cert_der) = self_signed_server_config()?;
        let mut endpoint = Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| NodeError::Transport(format!("failed to bind QUIC endpoint: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config()?);

        Ok(Self {
            endpoint,
            config,
            metrics: Arc::new(MetricsRecorder::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .local_addr()
            .map_err(|e| NodeError::Transport(e.to_string()))
    }

    /// Wait for the next inbound connection. The remote side has not
    /// presented an application-level identity at this layer, so the
    /// returned connection's `remote_peer()` is a placeholder hashed from
    /// its socket address (see `PeerId::from_addr_hash`).
    pub async fn accept(&self) -> Result<Arc<QuicConnection>> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| NodeError::Transport("QUIC endpoint closed".into()))?;
        let connection = incoming
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let peer_id = PeerId::from_addr_hash(&connection.remote_address());
        Ok(Arc::new(QuicConnection {
            peer_id,
            connection,
            latency: Duration::from_secs(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            metrics: Arc::clone(&self.metrics),
        }))
    }
}

#[async_trait]
impl Transport for QuicTransport {
    fn name(&self) -> &str {
        "quic"
    }

    async fn connect(&self, peer_id: PeerId, addresses: &[SocketAddr]) -> Result<Arc<dyn Connection>> {
        for addr in addresses {
            self.metrics.record_attempt();
            let started = Instant::now();
            let attempt = tokio::time::timeout(self.config.connect_timeout, async {
                let connecting = self
                    .endpoint
                    .connect(*addr, "xelvra-peer")
                    .map_err(|e| NodeError::Transport(e.to_string()))?;
                connecting.await.map_err(|e| NodeError::Transport(e.to_string()))
            })
            .await;

            match attempt {
                Ok(Ok(connection)) => {
                    self.metrics.record_success(started.elapsed());
                    return Ok(Arc::new(QuicConnection {
                        peer_id,
                        connection,
                        latency: started.elapsed(),
                        bytes_up: AtomicU64::new(0),
                        bytes_down: AtomicU64::new(0),
                        metrics: Arc::clone(&self.metrics),
                    }));
                }
                Ok(Err(e)) => {
                    self.metrics.record_error();
                    tracing::debug!("quic connect to {addr} failed: {e}");
                }
                Err(_) => {
                    self.metrics.record_error();
                    tracing::debug!("quic connect to {addr} timed out");
                }
            }
        }
        Err(NodeError::Transport(format!("no reachable QUIC address for {peer_id}")))
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }
}

pub struct QuicConnection {
    peer_id: PeerId,
    connection: quinn::Connection,
    latency: Duration,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    metrics: Arc<MetricsRecorder>,
}

#[async_trait]
impl Connection for QuicConnection {
    async fn open_stream(&self, _protocol: &str) -> Result<Box<dyn Stream>> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        Ok(Box::new(QuicSubstream {
            send,
            recv,
            deadline: None,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.metrics.record_disconnect();
        self.connection.close(0u32.into(), b"bye");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.close_reason().is_none()
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn bandwidth(&self) -> (u64, u64) {
        (
            self.bytes_up.load(Ordering::Relaxed),
            self.bytes_down.load(Ordering::Relaxed),
        )
    }

    fn remote_peer(&self) -> PeerId {
        self.peer_id
    }
}

impl QuicConnection {
    /// Wait for the next stream the remote side opens on this connection.
    /// The accept-side counterpart to `open_stream`.
    pub async fn accept_stream(&self) -> Result<Box<dyn Stream>> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        Ok(Box::new(QuicSubstream {
            send,
            recv,
            deadline: None,
        }))
    }
}

struct QuicSubstream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    deadline: Option<Duration>,
}

#[async_trait]
impl Stream for QuicSubstream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fut = self.recv.read(buf);
        let result = match self.deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| NodeError::Timeout("stream read timed out".into()))?,
            None => fut.await,
        };
        result
            .map_err(|e| NodeError::Transport(e.to_string()))?
            .ok_or_else(|| NodeError::Transport("stream closed".into()))
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let fut = self.send.write_all(buf);
        match self.deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| NodeError::Timeout("stream write timed out".into()))?
                .map_err(|e| NodeError::Transport(e.to_string())),
            None => fut.await.map_err(|e| NodeError::Transport(e.to_string())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.send
            .finish()
            .map_err(|e| NodeError::Transport(e.to_string()))
    }

    fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.deadline = deadline;
    }
}

fn self_signed_server_config() -> Result<(ServerConfig, Vec<u8>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["xelvra-peer".into()])
        .map_err(|e| NodeError::Transport(format!("failed to generate self-signed cert: {e}")))?;
    let cert_der = cert.cert.der().to_vec();
    let key_der = cert.key_pair.serialize_der();

    let server_config = ServerConfig::with_single_cert(
        vec![cert.cert.der().clone()],
        rustls::pki_types::PrivateKeyDer::Pkcs8(key_der.into()),
    )
    .map_err(|e| NodeError::Transport(format!("invalid QUIC server cert: {e}")))?;

    Ok((server_config, cert_der))
}

fn insecure_client_config() -> Result<ClientConfig> {
    let roots = rustls::RootCertStore::empty();
    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(AcceptAnyServerCert));
    tls_config.alpn_protocols = vec![ALPN.to_vec()];

    let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
        .map_err(|e| NodeError::Transport(format!("invalid QUIC client TLS config: {e}")))?;
    Ok(ClientConfig::new(Arc::new(quic_tls)))
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
