// STUN client: reflexive-address discovery over UDP.
//
// Grounded directly on the teacher's `network/ports/nat.rs::StunClient`,
// carried over near-verbatim and generalized to also return the reflexive
// *port* (the teacher only resolves the external IP) and to iterate a server
// list with a per-server timeout rather than a single cached server.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;

use crate::error::{NodeError, Result};

const MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xA4, 0x42];
const BINDING_REQUEST: [u8; 2] = [0x00, 0x01];
const PER_SERVER_TIMEOUT: Duration = Duration::from_secs(5);

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

pub struct StunClient {
    servers: Vec<String>,
}

impl StunClient {
    pub fn new(servers: Vec<String>) -> Self {
        Self { servers }
    }

    /// Iterate servers in order, stopping at first success. Returns the
    /// reflexive address/port alongside the *actual* local address the
    /// querying socket used (the OS picks the outbound interface once the
    /// socket is connected to the server) — callers classifying NAT type
    /// need this, not whatever bind address they started with.
    pub async fn discover(&self) -> Result<(IpAddr, u16, SocketAddr)> {
        let mut last_err = None;
        for server in &self.servers {
            match self.query(server, PER_SERVER_TIMEOUT).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!("STUN query to {server} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NodeError::Nat("no STUN servers configured".into())))
    }

    /// Query a single server, building a Binding Request and parsing the
    /// reflexive address out of the Binding Response. Also returns the
    /// local address of the socket used for the query.
    pub async fn query(&self, server: &str, timeout: Duration) -> Result<(IpAddr, u16, SocketAddr)> {
        let server_addr = resolve(server)?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| NodeError::Nat(format!("failed to bind UDP socket: {e}")))?;
        socket
            .connect(server_addr)
            .await
            .map_err(|e| NodeError::Nat(format!("failed to connect to STUN server: {e}")))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NodeError::Nat(format!("failed to read local socket address: {e}")))?;

        let (request, transaction_id) = build_binding_request();
        socket
            .send(&request)
            .await
            .map_err(|e| NodeError::Nat(format!("failed to send STUN request: {e}")))?;

        let mut buffer = vec![0u8; 1024];
        let n = tokio::time::timeout(timeout, socket.recv(&mut buffer))
            .await
            .map_err(|_| NodeError::Timeout("STUN request timed out".into()))?
            .map_err(|e| NodeError::Nat(format!("failed to receive STUN response: {e}")))?;

        let (reflexive_ip, reflexive_port) = parse_binding_response(&buffer[..n], &transaction_id)?;
        Ok((reflexive_ip, reflexive_port, local_addr))
    }
}

fn resolve(server: &str) -> Result<SocketAddr> {
    server
        .parse()
        .or_else(|_| {
            use std::net::ToSocketAddrs;
            server
                .to_socket_addrs()
                .ok()
                .and_then(|mut it| it.next())
                .ok_or(())
        })
        .map_err(|_| NodeError::Nat(format!("invalid STUN server address: {server}")))
}

fn build_binding_request() -> (Vec<u8>, [u8; 12]) {
    let mut transaction_id = [0u8; 12];
    rand::rng().fill_bytes(&mut transaction_id);

    let mut request = Vec::with_capacity(20);
    request.extend_from_slice(&BINDING_REQUEST);
    request.extend_from_slice(&[0x00, 0x00]); // length: no attributes
    request.extend_from_slice(&MAGIC_COOKIE);
    request.extend_from_slice(&transaction_id);

    (request, transaction_id)
}

fn parse_binding_response(response: &[u8], expected_transaction_id: &[u8; 12]) -> Result<(IpAddr, u16)> {
    if response.len() < 20 {
        return Err(NodeError::Nat("STUN response too short".into()));
    }
    if response[4..8] != MAGIC_COOKIE {
        return Err(NodeError::Nat("STUN response: bad magic cookie".into()));
    }
    if response[8..20] != *expected_transaction_id {
        return Err(NodeError::Nat("STUN response: transaction id mismatch".into()));
    }

    let mut offset = 20;
    let mut mapped = None;
    while offset + 4 <= response.len() {
        let attr_type = u16::from_be_bytes([response[offset], response[offset + 1]]);
        let attr_len = u16::from_be_bytes([response[offset + 2], response[offset + 3]]) as usize;

        if offset + 4 + attr_len > response.len() {
            break;
        }
        let attr_data = &response[offset + 4..offset + 4 + attr_len];

        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            mapped = Some(parse_mapped_address(attr_data, Some(expected_transaction_id))?);
            break; // prefer XOR-MAPPED-ADDRESS, stop as soon as we find it
        } else if attr_type == ATTR_MAPPED_ADDRESS && mapped.is_none() {
            mapped = Some(parse_mapped_address(attr_data, None)?);
        }

        offset += 4 + attr_len;
        offset = (offset + 3) & !3; // 4-byte attribute padding
    }

    mapped.ok_or_else(|| NodeError::Nat("no mapped address in STUN response".into()))
}

/// `xor_transaction_id` is `Some` for XOR-MAPPED-ADDRESS (RFC 5389 §15.2: the
/// port is XORed with the cookie's high 16 bits, and the address with the
/// cookie followed by the transaction ID, truncated to the address length)
/// and `None` for plain MAPPED-ADDRESS.
fn parse_mapped_address(data: &[u8], xor_transaction_id: Option<&[u8; 12]>) -> Result<(IpAddr, u16)> {
    if data.len() < 8 {
        return Err(NodeError::Nat("malformed mapped-address attribute".into()));
    }
    let family = data[1];
    let mut port = u16::from_be_bytes([data[2], data[3]]);
    if xor_transaction_id.is_some() {
        port ^= u16::from_be_bytes([MAGIC_COOKIE[0], MAGIC_COOKIE[1]]);
    }

    match family {
        0x01 => {
            let mut ip_bytes = [data[4], data[5], data[6], data[7]];
            if xor_transaction_id.is_some() {
                for i in 0..4 {
                    ip_bytes[i] ^= MAGIC_COOKIE[i];
                }
            }
            Ok((IpAddr::V4(Ipv4Addr::from(ip_bytes)), port))
        }
        0x02 => {
            if data.len() < 20 {
                return Err(NodeError::Nat("malformed IPv6 mapped-address".into()));
            }
            let mut ip_bytes = [0u8; 16];
            ip_bytes.copy_from_slice(&data[4..20]);
            if let Some(transaction_id) = xor_transaction_id {
                let mask: [u8; 16] = {
                    let mut m = [0u8; 16];
                    m[..4].copy_from_slice(&MAGIC_COOKIE);
                    m[4..].copy_from_slice(transaction_id);
                    m
                };
                for i in 0..16 {
                    ip_bytes[i] ^= mask[i];
                }
            }
            Ok((IpAddr::V6(Ipv6Addr::from(ip_bytes)), port))
        }
        _ => Err(NodeError::Nat(format!("unknown address family {family}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_request_has_valid_header() {
        let (request, transaction_id) = build_binding_request();
        assert_eq!(request.len(), 20);
        assert_eq!(&request[0..2], &BINDING_REQUEST);
        assert_eq!(&request[4..8], &MAGIC_COOKIE);
        assert_eq!(&request[8..20], &transaction_id);
    }

    #[test]
    fn rejects_short_response() {
        let txid = [0u8; 12];
        assert!(parse_binding_response(&[0u8; 10], &txid).is_err());
    }

    #[test]
    fn rejects_bad_magic_cookie() {
        let txid = [0u8; 12];
        let mut buf = vec![0u8; 20];
        buf[0..2].copy_from_slice(&[0x01, 0x01]);
        assert!(parse_binding_response(&buf, &txid).is_err());
    }

    fn xor_mapped_address_response(txid: &[u8; 12], addr: SocketAddr) -> Vec<u8> {
        let mut attr = vec![0u8, 0u8, 0u8, 0u8];
        let port_xor = addr.port() ^ u16::from_be_bytes([MAGIC_COOKIE[0], MAGIC_COOKIE[1]]);
        attr[2..4].copy_from_slice(&port_xor.to_be_bytes());
        match addr.ip() {
            IpAddr::V4(v4) => {
                attr[1] = 0x01;
                for (i, byte) in v4.octets().iter().enumerate() {
                    attr.push(byte ^ MAGIC_COOKIE[i]);
                }
            }
            IpAddr::V6(v6) => {
                attr[1] = 0x02;
                let mut mask = [0u8; 16];
                mask[..4].copy_from_slice(&MAGIC_COOKIE);
                mask[4..].copy_from_slice(txid);
                for (i, byte) in v6.octets().iter().enumerate() {
                    attr.push(byte ^ mask[i]);
                }
            }
        }

        let mut response = vec![0u8; 20];
        response[4..8].copy_from_slice(&MAGIC_COOKIE);
        response[8..20].copy_from_slice(txid);
        response.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        response.extend_from_slice(&((attr.len() - 4) as u16).to_be_bytes());
        response.extend_from_slice(&attr);
        response
    }

    #[test]
    fn xor_mapped_address_round_trips_ipv4() {
        let txid = [7u8; 12];
        let addr: SocketAddr = "203.0.113.42:54321".parse().unwrap();
        let response = xor_mapped_address_response(&txid, addr);
        let (ip, port) = parse_binding_response(&response, &txid).unwrap();
        assert_eq!(ip, addr.ip());
        assert_eq!(port, addr.port());
    }

    #[test]
    fn xor_mapped_address_round_trips_ipv6() {
        let txid = [9u8; 12];
        let addr: SocketAddr = "[2001:db8::1]:54321".parse().unwrap();
        let response = xor_mapped_address_response(&txid, addr);
        let (ip, port) = parse_binding_response(&response, &txid).unwrap();
        assert_eq!(ip, addr.ip());
        assert_eq!(port, addr.port());
    }
}
