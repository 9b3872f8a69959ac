// Discovery engine: mDNS, UDP broadcast, and structured overlay (Kademlia
// style), merged into a shared discovered-peers map with an LRU of locally
// known peers.
//
// Grounded on `networking/autodiscovery/{mdns,broadcast}.rs` for the two
// UDP-based methods and `networking/routing/table.rs` for the routing-table
// shape, generalized to XOR-distance `KBucket` keying.

pub mod broadcast;
pub mod mdns;
pub mod overlay;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::common::BoundedHashMap;
use crate::identity::PeerId;

pub const LOCAL_PEER_CACHE_DEFAULT_CAPACITY: usize = 100;
const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
    Mdns,
    UdpBroadcast,
    Overlay,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLifecycle {
    Discovered,
    Connected,
    Stale,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addresses: Vec<SocketAddr>,
    pub last_seen: Instant,
    pub reliability: f64,
    pub smoothed_response_time: Duration,
    pub battery_friendly: bool,
    pub source: PeerSource,
    pub state: PeerLifecycle,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId, addresses: Vec<SocketAddr>, source: PeerSource) -> Self {
        Self {
            peer_id,
            addresses,
            last_seen: Instant::now(),
            reliability: 0.0,
            smoothed_response_time: Duration::from_millis(0),
            battery_friendly: true,
            source,
            state: PeerLifecycle::Discovered,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > STALE_AFTER
    }

    /// Is any known address within 10/8, 172.16/12, 192.168/16, or 127/8.
    pub fn has_local_address(&self) -> bool {
        self.addresses
            .iter()
            .any(|addr| crate::net::nat::is_private(&addr.ip()))
    }
}

/// Ordered map from PeerID to PeerRecord with insertion-recency ordering,
/// bounded capacity. Thin wrapper over `common::BoundedHashMap` keyed by
/// PeerID, which already implements exactly the required LRU semantics.
pub struct LocalPeerCache {
    inner: RwLock<BoundedHashMap<PeerId, PeerRecord>>,
}

impl LocalPeerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(BoundedHashMap::new(capacity)),
        }
    }

    /// Local addresses are inserted preferentially: if the cache is full and
    /// `record` carries a local address, evict the least-recently-seen
    /// non-local entry instead of the global LRU head, so LAN peers survive
    /// eviction pressure from remote ones.
    pub fn add(&self, record: PeerRecord) {
        let mut inner = self.inner.write();
        if record.has_local_address() && inner.len() >= inner.capacity() && !inner.contains_key(&record.peer_id) {
            let victim = inner
                .iter()
                .filter(|(_, existing)| !existing.has_local_address())
                .min_by_key(|(_, existing)| existing.last_seen)
                .map(|(peer_id, _)| *peer_id);
            if let Some(victim) = victim {
                inner.remove(&victim);
            }
        }
        inner.insert(record.peer_id, record);
    }

    /// Accessing a key promotes it to most-recently-used.
    pub fn access(&self, peer_id: &PeerId) -> Option<PeerRecord> {
        self.inner.write().get(peer_id).cloned()
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.inner.read().contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evict_stale(&self) {
        let mut inner = self.inner.write();
        let stale: Vec<PeerId> = inner
            .iter()
            .filter(|(_, record)| record.is_stale())
            .map(|(peer_id, _)| *peer_id)
            .collect();
        for peer_id in stale {
            inner.remove(&peer_id);
        }
    }
}

impl Default for LocalPeerCache {
    fn default() -> Self {
        Self::new(LOCAL_PEER_CACHE_DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryStatus {
    pub mdns_active: bool,
    pub dht_active: bool,
    pub udp_active: bool,
    pub bootstrap_peer_ids: Vec<PeerId>,
    pub known_peer_count: usize,
    pub last_discovery_ts: Option<Instant>,
}

/// Merges results from all three discovery methods into a shared
/// discovered-peers map keyed by PeerID; address sets union; new PeerIDs are
/// surfaced to the caller (who emits a `peer_discovered` event on C9).
pub struct DiscoveryArbiter {
    discovered: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl Default for DiscoveryArbiter {
    fn default() -> Self {
        Self {
            discovered: RwLock::new(HashMap::new()),
        }
    }
}

impl DiscoveryArbiter {
    /// Returns `true` if this PeerID was not previously known (new arrival).
    pub fn merge(&self, peer_id: PeerId, addresses: Vec<SocketAddr>, source: PeerSource) -> bool {
        let mut discovered = self.discovered.write();
        match discovered.get_mut(&peer_id) {
            Some(existing) => {
                for addr in addresses {
                    if !existing.addresses.contains(&addr) {
                        existing.addresses.push(addr);
                    }
                }
                existing.last_seen = Instant::now();
                false
            }
            None => {
                discovered.insert(peer_id, PeerRecord::new(peer_id, addresses, source));
                true
            }
        }
    }

    pub fn known_peer_count(&self) -> usize {
        self.discovered.read().len()
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.discovered.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn lru_semantics_match_p4() {
        let cache = LocalPeerCache::new(3);
        cache.add(PeerRecord::new(peer(1), vec![], PeerSource::Manual));
        cache.add(PeerRecord::new(peer(2), vec![], PeerSource::Manual));
        cache.add(PeerRecord::new(peer(3), vec![], PeerSource::Manual));
        cache.access(&peer(1));
        cache.add(PeerRecord::new(peer(4), vec![], PeerSource::Manual));

        assert!(cache.contains(&peer(1)));
        assert!(!cache.contains(&peer(2)));
        assert!(cache.contains(&peer(3)));
        assert!(cache.contains(&peer(4)));
    }

    /// E3: insert P1..P101 into a capacity-100 cache (P1 evicted, P101
    /// present); `access(P2)` then insertion of P102 evicts P3.
    #[test]
    fn lru_correctness_e3() {
        let cache = LocalPeerCache::new(100);
        for i in 1..=101u8 {
            cache.add(PeerRecord::new(peer(i), vec![], PeerSource::Manual));
        }
        assert!(!cache.contains(&peer(1)));
        assert!(cache.contains(&peer(101)));

        cache.access(&peer(2));
        cache.add(PeerRecord::new(peer(102), vec![], PeerSource::Manual));
        assert!(!cache.contains(&peer(3)));
        assert!(cache.contains(&peer(2)));
        assert!(cache.contains(&peer(102)));
    }

    #[test]
    fn arbitration_unions_addresses_and_reports_new_arrivals() {
        let arbiter = DiscoveryArbiter::default();
        let a1: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let a2: SocketAddr = "127.0.0.1:9001".parse().unwrap();

        assert!(arbiter.merge(peer(1), vec![a1], PeerSource::Mdns));
        assert!(!arbiter.merge(peer(1), vec![a2], PeerSource::UdpBroadcast));

        let snapshot = arbiter.snapshot();
        let record = snapshot.iter().find(|r| r.peer_id == peer(1)).unwrap();
        assert_eq!(record.addresses.len(), 2);
    }
}
