// TCP transport: the fallback transport selected per spec §4.10 (primary
// QUIC, fallback TCP). Grounded on the teacher's `TcpTransport`/`TcpConnection`
// shape in `networking/transport/tcp.rs`, trimmed to the `Transport`/
// `Connection`/`Stream` trait-object surface.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{NodeError, Result};
use crate::identity::PeerId;
use crate::net::transport::metrics::{MetricsRecorder, TransportMetrics};
use crate::net::transport::{Connection, Stream, Transport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TcpConfig {
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

pub struct TcpTransport {
    config: TcpConfig,
    metrics: Arc<MetricsRecorder>,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MetricsRecorder::default()),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn connect(&self, peer_id: PeerId, addresses: &[SocketAddr]) -> Result<Arc<dyn Connection>> {
        for addr in addresses {
            self.metrics.record_attempt();
            let started = Instant::now();
            let attempt = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await;
            match attempt {
                Ok(Ok(stream)) => {
                    self.metrics.record_success(started.elapsed());
                    let local_addr = stream
                        .local_addr()
                        .map_err(|e| NodeError::Transport(e.to_string()))?;
                    return Ok(Arc::new(TcpConnection {
                        peer_id,
                        local_addr,
                        remote_addr: *addr,
                        stream: Mutex::new(Some(stream)),
                        latency: started.elapsed(),
                        bytes_up: AtomicU64::new(0),
                        bytes_down: AtomicU64::new(0),
                        metrics: Arc::clone(&self.metrics),
                    }));
                }
                Ok(Err(e)) => {
                    self.metrics.record_error();
                    tracing::debug!("tcp connect to {addr} failed: {e}");
                }
                Err(_) => {
                    self.metrics.record_error();
                    tracing::debug!("tcp connect to {addr} timed out");
                }
            }
        }
        Err(NodeError::Transport(format!("no reachable TCP address for {peer_id}")))
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }
}

pub struct TcpConnection {
    peer_id: PeerId,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    latency: Duration,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
    metrics: Arc<MetricsRecorder>,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn open_stream(&self, _protocol: &str) -> Result<Box<dyn Stream>> {
        let stream = self
            .stream
            .lock()
            .await
            .take()
            .ok_or(NodeError::NotConnected)?;
        Ok(Box::new(TcpSubstream {
            stream,
            deadline: None,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.metrics.record_disconnect();
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    /// A `TcpConnection` yields exactly one stream: once `open_stream` has
    /// taken it, the connection is spent and must not be pooled for reuse.
    /// `try_lock` is non-blocking since this is a sync trait method; a
    /// contended lock (mid-`open_stream`/`close`) is treated as still
    /// connected rather than guessed at.
    fn is_connected(&self) -> bool {
        match self.stream.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => true,
        }
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

impl TcpConnection {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

pub(crate) struct TcpSubstream {
    stream: TcpStream,
    deadline: Option<Duration>,
}

/// Listening half of TCP, bound once at startup. A TCP connection carries
/// exactly one `/xelvra/1.0.0` stream in this model (no multiplexing), so
/// `accept` hands back the stream directly rather than a `Connection`.
pub struct TcpListenerHandle {
    listener: TcpListener,
}

impl TcpListenerHandle {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Transport(format!("failed to bind TCP listener: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| NodeError::Transport(e.to_string()))
    }

    /// Accept one inbound connection. The remote side has not presented an
    /// application-level identity, so the returned `PeerId` is a placeholder
    /// hashed from its socket address (see `PeerId::from_addr_hash`).
    pub async fn accept(&self) -> Result<(PeerId, Box<dyn Stream>)> {
        let (stream, remote_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let peer_id = PeerId::from_addr_hash(&remote_addr);
        Ok((
            peer_id,
            Box::new(TcpSubstream {
                stream,
                deadline: None,
            }),
        ))
    }
}

#[async_trait]
impl Stream for TcpSubstream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fut = self.stream.read(buf);
        match self.deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| NodeError::Timeout("stream read timed out".into()))?
                .map_err(|e| NodeError::Transport(e.to_string())),
            None => fut.await.map_err(|e| NodeError::Transport(e.to_string())),
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let fut = self.stream.write_all(buf);
        match self.deadline {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| NodeError::Timeout("stream write timed out".into()))?
                .map_err(|e| NodeError::Transport(e.to_string())),
            None => fut.await.map_err(|e| NodeError::Transport(e.to_string())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))
    }

    fn set_deadline(&mut self, deadline: Option<Duration>) {
        self.deadline = deadline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol;

    /// E1-style scenario (over loopback rather than a real LAN, since CI
    /// sandboxes commonly block multicast/mDNS): a listener accepts one
    /// connection, the dialer opens a stream and sends a framed message,
    /// the listener reads it and acknowledges.
    #[tokio::test]
    async fn round_trips_a_message_over_a_dialed_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (stream, _peer) = listener.accept().await.unwrap();
            let mut substream = TcpSubstream {
                stream,
                deadline: None,
            };
            let payload = protocol::read_message(&mut substream).await.unwrap();
            protocol::send_ack(&mut substream).await.unwrap();
            payload
        });

        let transport = TcpTransport::new(TcpConfig::default());
        let peer_id = PeerId::from_bytes([9u8; 32]);
        let connection = transport.connect(peer_id, &[listen_addr]).await.unwrap();
        let mut stream = connection.open_stream(crate::protocol::PROTOCOL_ID).await.unwrap();
        protocol::write_message(stream.as_mut(), b"hello-xelvra").await.unwrap();

        let received = accept_task.await.unwrap();
        assert_eq!(received, b"hello-xelvra");
    }
}
