// NAT classification.
//
// New code — the teacher's `nat.rs` resolves the external IP but never
// classifies NAT type. Reuses C2 (StunClient) and the "is this a local
// address" convention used throughout the teacher's `autodiscovery/*`.

use std::net::IpAddr;

use crate::error::Result;
use crate::net::stun::StunClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatType {
    Open,
    FullCone,
    RestrictedCone,
    PortRestricted,
    Symmetric,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingBehavior {
    EndpointIndependent,
    AddressDependent,
    AddressPortDependent,
}

#[derive(Debug, Clone)]
pub struct NatStatus {
    pub nat_type: NatType,
    pub reflexive_ip: Option<IpAddr>,
    pub reflexive_port: Option<u16>,
    pub mapping_behavior: MappingBehavior,
    pub filter_behavior: MappingBehavior,
    pub traversal_success_rate: f64,
    pub active_relay_count: usize,
}

impl Default for NatStatus {
    fn default() -> Self {
        Self {
            nat_type: NatType::Unknown,
            reflexive_ip: None,
            reflexive_port: None,
            mapping_behavior: MappingBehavior::EndpointIndependent,
            filter_behavior: MappingBehavior::EndpointIndependent,
            traversal_success_rate: 0.0,
            active_relay_count: 0,
        }
    }
}

/// Is `ip` within 10/8, 172.16/12, 192.168/16, or 127/8 (spec §4.5's
/// definition of a "local" address, reused here for NAT classification).
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
                || o[0] == 127
        }
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// Query STUN via `client` and apply the coarse five-state classifier of
/// spec §4.3. The local address compared against the reflexive address is
/// the STUN socket's own `local_addr()` (the OS-assigned outbound address),
/// not a caller-supplied bind address — those two may not match and would
/// otherwise misclassify every real NAT as `Symmetric`.
pub async fn detect(client: &StunClient) -> Result<NatStatus> {
    let (reflexive_ip, reflexive_port, local_addr) = match client.discover().await {
        Ok(triple) => triple,
        Err(e) => {
            tracing::warn!("STUN discovery failed, defaulting to Unknown NAT type: {e}");
            return Ok(NatStatus::default());
        }
    };

    let nat_type = classify(local_addr.ip(), local_addr.port(), reflexive_ip, reflexive_port);

    Ok(NatStatus {
        nat_type,
        reflexive_ip: Some(reflexive_ip),
        reflexive_port: Some(reflexive_port),
        ..NatStatus::default()
    })
}

fn classify(local_ip: IpAddr, local_port: u16, reflexive_ip: IpAddr, reflexive_port: u16) -> NatType {
    if reflexive_ip == local_ip {
        NatType::Open
    } else if reflexive_port == local_port && is_private(&local_ip) {
        NatType::FullCone
    } else if is_private(&local_ip) && reflexive_port != local_port {
        NatType::PortRestricted
    } else {
        NatType::Symmetric
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn open_when_reflexive_equals_local() {
        let ip = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(classify(ip, 100, ip, 100), NatType::Open);
    }

    #[test]
    fn full_cone_when_ports_match_and_private() {
        let local = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));
        let reflexive = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
        assert_eq!(classify(local, 5000, reflexive, 5000), NatType::FullCone);
    }

    #[test]
    fn port_restricted_when_ports_differ_and_private() {
        let local = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5));
        let reflexive = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
        assert_eq!(classify(local, 5000, reflexive, 6000), NatType::PortRestricted);
    }

    #[test]
    fn symmetric_otherwise() {
        let local = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let reflexive = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1));
        assert_eq!(classify(local, 5000, reflexive, 6000), NatType::Symmetric);
    }

    #[test]
    fn private_ranges_detected() {
        assert!(is_private(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(is_private(&IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1))));
        assert!(is_private(&IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))));
        assert!(is_private(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(!is_private(&IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }
}
