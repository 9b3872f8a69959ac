// UDP broadcast discovery: fixed port 42424, payload
// `XELVRA_PEER:<textual_peer_id>`, sent every 30 seconds.
//
// Grounded on `networking/autodiscovery/broadcast.rs` (std socket built with
// `set_broadcast`/`set_nonblocking` then wrapped as a tokio socket).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::error::{NodeError, Result};
use crate::identity::PeerId;
use crate::net::discovery::PeerSource;

pub const BROADCAST_PORT: u16 = 42424;
/// Initial announce cadence, matching `energy::Cadence::NORMAL_HIGH`'s
/// `heartbeat_interval`. The live node retunes this via the energy governor
/// rather than holding it fixed.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(30);
const PAYLOAD_PREFIX: &str = "XELVRA_PEER:";

pub struct BroadcastDiscovery {
    socket: Arc<UdpSocket>,
    self_peer_id: PeerId,
}

pub struct DiscoveredPeer {
    pub peer_id: PeerId,
    pub source: PeerSource,
}

impl BroadcastDiscovery {
    pub async fn bind(self_peer_id: PeerId) -> Result<Self> {
        let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, BROADCAST_PORT))
            .map_err(|e| NodeError::Discovery(format!("failed to bind broadcast socket: {e}")))?;
        std_socket
            .set_broadcast(true)
            .map_err(|e| NodeError::Discovery(format!("failed to enable broadcast: {e}")))?;
        std_socket
            .set_nonblocking(true)
            .map_err(|e| NodeError::Discovery(format!("failed to set nonblocking: {e}")))?;

        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| NodeError::Discovery(format!("failed to create tokio socket: {e}")))?;

        Ok(Self {
            socket: Arc::new(socket),
            self_peer_id,
        })
    }

    pub async fn announce(&self) -> Result<()> {
        let payload = format!("{PAYLOAD_PREFIX}{}", self.self_peer_id.to_hex());
        let target = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::BROADCAST), BROADCAST_PORT);
        self.socket
            .send_to(payload.as_bytes(), target)
            .await
            .map_err(|e| NodeError::Discovery(format!("broadcast send failed: {e}")))?;
        Ok(())
    }

    /// Listen continuously, forwarding parsed, non-self peer ids through
    /// `tx` until `cancel` fires.
    pub async fn listen(
        &self,
        tx: mpsc::Sender<DiscoveredPeer>,
        mut cancel: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
                result = tokio::time::timeout(Duration::from_secs(1), self.socket.recv_from(&mut buf)) => {
                    let Ok(Ok((n, _from))) = result else { continue };
                    if let Some(peer_id) = parse_datagram(&buf[..n]) {
                        if peer_id != self.self_peer_id && tx.send(DiscoveredPeer { peer_id, source: PeerSource::UdpBroadcast }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn parse_datagram(data: &[u8]) -> Option<PeerId> {
    let text = std::str::from_utf8(data).ok()?;
    let hex_id = text.strip_prefix(PAYLOAD_PREFIX)?;
    PeerId::from_hex(hex_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_malformed_payloads() {
        assert!(parse_datagram(b"garbage").is_none());
        assert!(parse_datagram(b"XELVRA_PEER:not-hex").is_none());
    }

    #[test]
    fn parses_well_formed_payload() {
        let id = PeerId::from_bytes([7u8; 32]);
        let payload = format!("{PAYLOAD_PREFIX}{}", id.to_hex());
        assert_eq!(parse_datagram(payload.as_bytes()), Some(id));
    }
}
