// mDNS discovery: advertise and resolve service name `xelvra-p2p` on the
// link-local multicast group (224.0.0.251:5353).
//
// Grounded on `networking/autodiscovery/mdns.rs`'s socket2-based multicast
// join pattern, trimmed to the advertise/resolve pair spec §4.5 requires.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{NodeError, Result};
use crate::identity::PeerId;
use crate::net::discovery::PeerSource;

pub const MDNS_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;
pub const SERVICE_NAME: &str = "xelvra-p2p";

pub struct MdnsDiscovery {
    socket: UdpSocket,
    self_peer_id: PeerId,
    self_addrs: Vec<SocketAddr>,
}

pub struct ResolvedPeer {
    pub peer_id: PeerId,
    pub addresses: Vec<SocketAddr>,
    pub source: PeerSource,
}

impl MdnsDiscovery {
    pub fn bind(self_peer_id: PeerId, self_addrs: Vec<SocketAddr>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NodeError::Discovery(format!("failed to create mDNS socket: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| NodeError::Discovery(format!("failed to set SO_REUSEADDR: {e}")))?;
        socket
            .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT).into())
            .map_err(|e| NodeError::Discovery(format!("failed to bind mDNS socket: {e}")))?;
        socket
            .join_multicast_v4(&MDNS_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| NodeError::Discovery(format!("failed to join multicast group: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| NodeError::Discovery(format!("failed to set nonblocking: {e}")))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| NodeError::Discovery(format!("failed to create tokio socket: {e}")))?;

        Ok(Self {
            socket,
            self_peer_id,
            self_addrs,
        })
    }

    pub async fn advertise(&self) -> Result<()> {
        let addrs: Vec<String> = self.self_addrs.iter().map(|a| a.to_string()).collect();
        let payload = format!(
            "{SERVICE_NAME}:{}:{}",
            self.self_peer_id.to_hex(),
            addrs.join(",")
        );
        let target = SocketAddr::new(MDNS_MULTICAST_ADDR.into(), MDNS_PORT);
        self.socket
            .send_to(payload.as_bytes(), target)
            .await
            .map_err(|e| NodeError::Discovery(format!("mDNS advertise failed: {e}")))?;
        Ok(())
    }

    pub async fn resolve_once(&self, timeout: Duration) -> Result<Option<ResolvedPeer>> {
        let mut buf = [0u8; 512];
        let received = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await;
        let Ok(Ok((n, _from))) = received else {
            return Ok(None);
        };
        Ok(parse_advertisement(&buf[..n]).filter(|p| p.peer_id != self.self_peer_id))
    }
}

fn parse_advertisement(data: &[u8]) -> Option<ResolvedPeer> {
    let text = std::str::from_utf8(data).ok()?;
    let rest = text.strip_prefix(&format!("{SERVICE_NAME}:"))?;
    let (hex_id, addr_list) = rest.split_once(':')?;
    let peer_id = PeerId::from_hex(hex_id)?;
    let addresses = addr_list
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    Some(ResolvedPeer {
        peer_id,
        addresses,
        source: PeerSource::Mdns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_advertisement() {
        let id = PeerId::from_bytes([3u8; 32]);
        let payload = format!("{SERVICE_NAME}:{}:127.0.0.1:9000,127.0.0.1:9001", id.to_hex());
        let resolved = parse_advertisement(payload.as_bytes()).unwrap();
        assert_eq!(resolved.peer_id, id);
        assert_eq!(resolved.addresses.len(), 2);
    }

    #[test]
    fn rejects_wrong_service_name() {
        assert!(parse_advertisement(b"other-service:deadbeef:").is_none());
    }
}
