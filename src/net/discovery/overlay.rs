// Structured overlay (Kademlia-style DHT): bootstrap from a fixed entry
// list, advertise under a namespace every 5 minutes, search every 2 minutes
// (delayed 30 s after start).
//
// Grounded on `networking/routing/table.rs`'s routing-table shape,
// generalized from the teacher's shard/datacenter keying to XOR-distance
// `KBucket` keying as spec §3/§4.5 require.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::identity::PeerId;

pub const NAMESPACE: &str = "xelvra-p2p";
pub const ADVERTISE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Initial search cadence, matching `energy::Cadence::NORMAL_HIGH`'s
/// `dht_search_interval`. The live node retunes this via the energy governor
/// rather than holding it fixed.
pub const SEARCH_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const SEARCH_STARTUP_DELAY: Duration = Duration::from_secs(30);
pub const BUCKET_COUNT: usize = 256;
pub const BUCKET_CAPACITY: usize = 20;
const STALE_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct BucketEntry {
    peer_id: PeerId,
    last_seen: Instant,
    reliability: f64,
}

/// Slot within the 256-entry routing table keyed by XOR-distance prefix
/// length; each slot holds up to `BUCKET_CAPACITY` peers.
#[derive(Default)]
struct KBucket {
    entries: Vec<BucketEntry>,
}

impl KBucket {
    fn upsert(&mut self, peer_id: PeerId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer_id == peer_id) {
            entry.last_seen = Instant::now();
            return;
        }
        if self.entries.len() >= BUCKET_CAPACITY {
            // Evict the least-recently-seen entry to make room, matching
            // the staleness-driven eviction `table.rs` uses per shard.
            if let Some((idx, _)) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_seen)
            {
                self.entries.remove(idx);
            }
        }
        self.entries.push(BucketEntry {
            peer_id,
            last_seen: Instant::now(),
            reliability: 0.0,
        });
    }

    fn prune_stale(&mut self) {
        self.entries.retain(|e| e.last_seen.elapsed() <= STALE_AFTER);
    }
}

pub struct RoutingTable {
    self_id: PeerId,
    buckets: RwLock<Vec<KBucket>>,
}

impl RoutingTable {
    pub fn new(self_id: PeerId) -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        buckets.resize_with(BUCKET_COUNT, KBucket::default);
        Self {
            self_id,
            buckets: RwLock::new(buckets),
        }
    }

    pub fn insert(&self, peer_id: PeerId) {
        if peer_id == self.self_id {
            return;
        }
        let idx = bucket_index(&self.self_id, &peer_id);
        self.buckets.write()[idx].upsert(peer_id);
    }

    pub fn maintain(&self) {
        let mut buckets = self.buckets.write();
        for bucket in buckets.iter_mut() {
            bucket.prune_stale();
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.read().iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index into the 256-slot table: the bit-length of the common prefix
/// between `self_id` and `other`, i.e. `256 - leading_zero_bits(distance)`
/// capped at `BUCKET_COUNT - 1`.
fn bucket_index(self_id: &PeerId, other: &PeerId) -> usize {
    let distance = self_id.distance(other);
    let mut leading_zero_bits = 0usize;
    for byte in distance {
        if byte == 0 {
            leading_zero_bits += 8;
            continue;
        }
        leading_zero_bits += byte.leading_zeros() as usize;
        break;
    }
    (BUCKET_COUNT - 1).min(leading_zero_bits)
}

/// Background bootstrap state: entry peers dialed once at startup; after
/// bootstrap completes, advertise/search run on their own cadences.
pub struct Bootstrap {
    pub entry_peers: Vec<String>,
    pub completed: RwLock<bool>,
}

impl Bootstrap {
    pub fn new(entry_peers: Vec<String>) -> Self {
        Self {
            entry_peers,
            completed: RwLock::new(false),
        }
    }

    pub fn mark_completed(&self) {
        *self.completed.write() = true;
    }

    pub fn is_completed(&self) -> bool {
        *self.completed.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn self_is_never_inserted() {
        let table = RoutingTable::new(peer(1));
        table.insert(peer(1));
        assert!(table.is_empty());
    }

    #[test]
    fn distinct_peers_are_retained() {
        let table = RoutingTable::new(peer(1));
        table.insert(peer(2));
        table.insert(peer(3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn bucket_index_is_symmetric_distance_based() {
        let a = peer(0b0000_0001);
        let b = peer(0b0000_0011);
        assert_eq!(bucket_index(&a, &b), bucket_index(&b, &a));
    }
}
