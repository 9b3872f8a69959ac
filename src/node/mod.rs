// Node core: owns the host key (C1), wires C2-C9, publishes a status
// snapshot, handles graceful shutdown.
//
// Grounded on `networking/manager.rs`'s `NetworkManager`/
// `NetworkManagerBuilder` construction-order pattern and the teacher's
// top-level `main.rs` (banner print, tracing init, config load, graceful
// shutdown).

pub mod status;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{Component, HealthStatus};
use crate::config::NodeConfig;
use crate::endpoint::MessageEndpoint;
use crate::energy::EnergyGovernor;
use crate::error::Result;
use crate::events::{Event, EventBus, EventType};
use crate::identity::{Identity, PeerId};
use crate::net::discovery::broadcast::{BroadcastDiscovery, DiscoveredPeer};
use crate::net::discovery::mdns::MdnsDiscovery;
use crate::net::discovery::overlay::{Bootstrap, RoutingTable};
use crate::net::discovery::{DiscoveryArbiter, LocalPeerCache, PeerRecord};
use crate::net::nat::NatStatus;
use crate::net::stun::StunClient;
use crate::net::traversal::TraversalManager;
use crate::net::transport::quic::{QuicConfig, QuicTransport};
use crate::net::transport::tcp::{TcpConfig, TcpListenerHandle, TcpTransport};
use crate::net::transport::{Connection, PoolConfig, TransportManager};
use crate::reputation::ReputationManager;

use self::status::{DiscoveryInfo, NatInfo, NetworkQuality, NodeStatus};

/// State a background task needs that would otherwise force a strong
/// reference back to the whole `Node` (spec §9: no component holds a
/// back-reference to the node core). Every spawned loop captures a clone of
/// this struct, never `&Node` itself.
struct Shared {
    config: NodeConfig,
    peer_id: PeerId,
    transports: Arc<TransportManager>,
    discovery_arbiter: Arc<DiscoveryArbiter>,
    nat_status: tokio::sync::RwLock<NatStatus>,
    listen_addrs: RwLock<Vec<SocketAddr>>,
    start_time: Instant,
    messages_processed: AtomicU64,
    /// Set by `wire_transports` once binding succeeds; read by the accept
    /// loops spawned afterwards. `None` means that transport has no
    /// listening side this run (e.g. the QUIC port was unavailable).
    quic_transport: Mutex<Option<Arc<QuicTransport>>>,
    tcp_listener: Mutex<Option<Arc<TcpListenerHandle>>>,
    mdns_active: AtomicBool,
    dht_active: AtomicBool,
    udp_active: AtomicBool,
}

impl Shared {
    async fn status_snapshot(&self, is_running: bool) -> NodeStatus {
        let nat_status = self.nat_status.read().await.clone();
        NodeStatus {
            peer_id: self.peer_id.to_string(),
            listen_addrs: self.listen_addrs.read().iter().map(|a| a.to_string()).collect(),
            connected_peers: self.transports.pool().len(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            start_time: system_time_secs(self.start_time),
            last_update: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            process_id: std::process::id(),
            is_running,
            transports: self
                .transports
                .transports_snapshot()
                .into_iter()
                .map(|(name, metrics)| status::TransportDescriptor {
                    name,
                    active_connections: metrics.active_connections,
                    error_count: metrics.error_count,
                })
                .collect(),
            nat_info: NatInfo::from(&nat_status),
            discovery: DiscoveryInfo {
                mdns_active: self.mdns_active.load(Ordering::Relaxed),
                dht_active: self.dht_active.load(Ordering::Relaxed),
                udp_active: self.udp_active.load(Ordering::Relaxed),
                known_peer_count: self.discovery_arbiter.known_peer_count(),
            },
            network_quality: estimate_network_quality(&nat_status),
        }
    }
}

pub struct Node {
    identity: Identity,
    pub transports: Arc<TransportManager>,
    pub discovery_cache: Arc<LocalPeerCache>,
    pub discovery_arbiter: Arc<DiscoveryArbiter>,
    pub routing_table: Arc<RoutingTable>,
    pub bootstrap: Arc<Bootstrap>,
    pub traversal: Arc<TraversalManager>,
    pub reputation: Arc<ReputationManager>,
    pub energy: Arc<EnergyGovernor>,
    pub events: Arc<EventBus>,
    pub endpoint: Arc<MessageEndpoint>,

    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Node {
    pub fn new(config: NodeConfig, identity: Identity) -> Self {
        let transports = Arc::new(TransportManager::new(PoolConfig {
            capacity: config.connection_pool_capacity,
            max_age: Duration::from_secs(config.connection_pool_max_age_secs),
        }));
        let events = Arc::new(EventBus::new(config.event_buffer_capacity, config.event_worker_count));
        let reputation = Arc::new(ReputationManager::default());
        let self_did = identity.did();
        let endpoint = Arc::new(MessageEndpoint::new(
            Arc::clone(&transports),
            Arc::clone(&events),
            Arc::clone(&reputation),
            self_did,
        ));
        let discovery_arbiter = Arc::new(DiscoveryArbiter::default());
        let peer_id = identity.peer_id();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            config: config.clone(),
            peer_id,
            transports: Arc::clone(&transports),
            discovery_arbiter: Arc::clone(&discovery_arbiter),
            nat_status: tokio::sync::RwLock::new(NatStatus::default()),
            listen_addrs: RwLock::new(Vec::new()),
            start_time: Instant::now(),
            messages_processed: AtomicU64::new(0),
            quic_transport: Mutex::new(None),
            tcp_listener: Mutex::new(None),
            mdns_active: AtomicBool::new(false),
            dht_active: AtomicBool::new(false),
            udp_active: AtomicBool::new(false),
        });

        Self {
            discovery_cache: Arc::new(LocalPeerCache::new(config.local_peer_cache_capacity)),
            discovery_arbiter,
            routing_table: Arc::new(RoutingTable::new(peer_id)),
            bootstrap: Arc::new(Bootstrap::new(config.bootstrap_peers.clone())),
            traversal: Arc::new(TraversalManager::default()),
            reputation,
            energy: Arc::new(EnergyGovernor::new(config.deep_sleep_battery_threshold)),
            events,
            endpoint,
            transports,
            shared,
            tasks: Mutex::new(Vec::new()),
            cancel_tx,
            cancel_rx,
            identity,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// 1. Identity already loaded by the caller via `new`.
    /// 2. Start C4 with registered transports and primary = QUIC, fallback
    ///    = TCP.
    /// 3. Start C5, C6 (internally uses C2/C3), C7, C8, C9.
    /// 4. Register the inbound handler on `/xelvra/1.0.0`.
    /// 5. Begin emitting the status snapshot.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(peer_id = %self.peer_id(), "starting node");

        self.wire_transports().await;
        self.run_nat_detection().await;

        let _ = self
            .events
            .publish(Event::new(EventType::NodeStarted, "node").with("peer_id", self.peer_id().to_string()));

        let mut tasks = self.tasks.lock();
        tasks.push(Arc::clone(&self.events).spawn_dispatch_loop(self.cancel_rx.clone()));
        tasks.push(self.spawn_mdns_loop());
        tasks.push(self.spawn_broadcast_loop());
        tasks.push(self.spawn_overlay_loop());
        tasks.push(self.spawn_traversal_gc_loop());
        tasks.push(self.spawn_energy_loop());
        tasks.push(self.spawn_status_loop());
        tasks.push(self.spawn_quic_accept_loop());
        tasks.push(self.spawn_tcp_accept_loop());

        Ok(())
    }

    /// Always registers TCP; registers QUIC too when the bind succeeds
    /// (e.g. the port is already taken), in which case QUIC stays primary
    /// and TCP is the sole fallback, per spec §4.10's composition order.
    /// Also binds the listening side of each transport so inbound streams
    /// can be accepted (step 4: register the `/xelvra/1.0.0` handler).
    async fn wire_transports(&self) {
        let tcp = Arc::new(TcpTransport::new(TcpConfig::default()));
        self.transports.register("tcp", tcp);

        let tcp_bind_addr: SocketAddr = format!("0.0.0.0:{}", self.shared.config.tcp_port)
            .parse()
            .expect("valid bind address");
        match TcpListenerHandle::bind(tcp_bind_addr).await {
            Ok(listener) => {
                if let Ok(addr) = listener.local_addr() {
                    self.shared.listen_addrs.write().push(addr);
                }
                *self.shared.tcp_listener.lock() = Some(Arc::new(listener));
            }
            Err(e) => {
                tracing::warn!("TCP listen failed, inbound streams over TCP disabled: {e}");
            }
        }

        let quic_bind_addr: SocketAddr = format!("0.0.0.0:{}", self.shared.config.quic_port)
            .parse()
            .expect("valid bind address");
        match QuicTransport::bind(QuicConfig {
            bind_addr: quic_bind_addr,
            ..QuicConfig::default()
        }) {
            Ok(quic) => {
                let quic = Arc::new(quic);
                if let Ok(addr) = quic.local_addr() {
                    self.shared.listen_addrs.write().push(addr);
                }
                self.transports.register("quic", Arc::clone(&quic));
                self.transports.set_primary("quic");
                self.transports.set_fallbacks(&["tcp"]);
                *self.shared.quic_transport.lock() = Some(quic);
            }
            Err(e) => {
                tracing::warn!("QUIC bind failed, falling back to TCP-only: {e}");
                self.transports.set_primary("tcp");
                self.transports.set_fallbacks(&[]);
            }
        }
    }

    async fn run_nat_detection(&self) {
        let stun = StunClient::new(self.shared.config.stun_servers.clone());
        match crate::net::nat::detect(&stun).await {
            Ok(status) => {
                *self.shared.nat_status.write().await = status;
            }
            Err(e) => {
                tracing::warn!("NAT detection failed, continuing with Unknown: {e}");
                let _ = self.events.publish(
                    Event::new(EventType::PerformanceWarning, "node").with("reason", e.to_string()),
                );
            }
        }
    }

    /// Advertises on the link-local multicast group and folds resolved
    /// peers into the discovery arbiter until cancellation. The advertise
    /// cadence is not a fixed constant: it tracks the energy governor's
    /// `heartbeat_interval` (spec §4.5/§9 — "mDNS rebroadcast interval... is
    /// a mutable parameter consumed by C8"), re-arming the tick whenever the
    /// governor retunes it.
    fn spawn_mdns_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let discovery_cache = Arc::clone(&self.discovery_cache);
        let events = Arc::clone(&self.events);
        let mut cancel = self.cancel_rx.clone();
        let mut cadence_rx = self.energy.cadence_rx();
        tokio::spawn(async move {
            let addrs = shared.listen_addrs.read().clone();
            let mdns = match MdnsDiscovery::bind(shared.peer_id, addrs) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("mDNS bind failed, discovery via mDNS disabled: {e}");
                    return;
                }
            };
            shared.mdns_active.store(true, Ordering::Relaxed);
            let mut advertise_tick = tokio::time::interval(cadence_rx.borrow().heartbeat_interval);
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                    }
                    _ = cadence_rx.changed() => {
                        advertise_tick = tokio::time::interval(cadence_rx.borrow().heartbeat_interval);
                    }
                    _ = advertise_tick.tick() => {
                        if let Err(e) = mdns.advertise().await {
                            tracing::debug!("mDNS advertise failed: {e}");
                        }
                    }
                    resolved = mdns.resolve_once(Duration::from_secs(1)) => {
                        if let Ok(Some(peer)) = resolved {
                            let is_new = shared.discovery_arbiter.merge(peer.peer_id, peer.addresses.clone(), peer.source);
                            discovery_cache.add(PeerRecord::new(peer.peer_id, peer.addresses, peer.source));
                            if is_new {
                                let _ = events.publish(
                                    Event::new(EventType::PeerDiscovered, "mdns")
                                        .with("peer_id", peer.peer_id.to_string()),
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    /// Announces on the broadcast port and forwards inbound announcements
    /// into the discovery arbiter. Like mDNS, the announce cadence tracks
    /// the governor's `heartbeat_interval` rather than a hardcoded 30s tick.
    fn spawn_broadcast_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let discovery_cache = Arc::clone(&self.discovery_cache);
        let events = Arc::clone(&self.events);
        let cancel_announce = self.cancel_rx.clone();
        let cancel_listen = self.cancel_rx.clone();
        let mut cadence_rx = self.energy.cadence_rx();
        tokio::spawn(async move {
            let broadcast = match BroadcastDiscovery::bind(shared.peer_id).await {
                Ok(b) => Arc::new(b),
                Err(e) => {
                    tracing::warn!("UDP broadcast bind failed, discovery via broadcast disabled: {e}");
                    return;
                }
            };
            shared.udp_active.store(true, Ordering::Relaxed);

            let (tx, mut rx) = mpsc::channel::<DiscoveredPeer>(32);
            let listen_broadcast = Arc::clone(&broadcast);
            let listen_task = tokio::spawn(async move {
                listen_broadcast.listen(tx, cancel_listen).await;
            });

            let announce_broadcast = Arc::clone(&broadcast);
            let mut cancel = cancel_announce;
            let mut tick = tokio::time::interval(cadence_rx.borrow().heartbeat_interval);
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                    }
                    _ = cadence_rx.changed() => {
                        tick = tokio::time::interval(cadence_rx.borrow().heartbeat_interval);
                    }
                    _ = tick.tick() => {
                        if let Err(e) = announce_broadcast.announce().await {
                            tracing::debug!("broadcast announce failed: {e}");
                        }
                    }
                    Some(peer) = rx.recv() => {
                        let is_new = shared.discovery_arbiter.merge(peer.peer_id, Vec::new(), peer.source);
                        discovery_cache.add(PeerRecord::new(peer.peer_id, Vec::new(), peer.source));
                        if is_new {
                            let _ = events.publish(
                                Event::new(EventType::PeerDiscovered, "broadcast")
                                    .with("peer_id", peer.peer_id.to_string()),
                            );
                        }
                    }
                }
            }
            let _ = listen_task.await;
        })
    }

    /// Structured-overlay bootstrap and maintenance: dials the configured
    /// bootstrap entries, waits out the startup delay so bootstrap can
    /// complete, then prunes stale routing-table entries on the search
    /// cadence, which tracks the governor's `dht_search_interval`.
    fn spawn_overlay_loop(&self) -> JoinHandle<()> {
        let routing_table = Arc::clone(&self.routing_table);
        let shared = Arc::clone(&self.shared);
        let transports = Arc::clone(&self.transports);
        let discovery_arbiter = Arc::clone(&self.discovery_arbiter);
        let discovery_cache = Arc::clone(&self.discovery_cache);
        let events = Arc::clone(&self.events);
        let bootstrap = Arc::clone(&self.bootstrap);
        let mut cancel = self.cancel_rx.clone();
        let mut cadence_rx = self.energy.cadence_rx();
        tokio::spawn(async move {
            bootstrap_overlay(
                &bootstrap,
                &transports,
                &routing_table,
                &discovery_arbiter,
                &discovery_cache,
                &events,
            )
            .await;

            tokio::select! {
                _ = cancel.changed() => { if *cancel.borrow() { return; } }
                _ = tokio::time::sleep(crate::net::discovery::overlay::SEARCH_STARTUP_DELAY) => {}
            }
            shared.dht_active.store(true, Ordering::Relaxed);
            let mut tick = tokio::time::interval(cadence_rx.borrow().dht_search_interval);
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                    }
                    _ = cadence_rx.changed() => {
                        tick = tokio::time::interval(cadence_rx.borrow().dht_search_interval);
                    }
                    _ = tick.tick() => {
                        routing_table.maintain();
                    }
                }
            }
        })
    }

    /// Garbage-collects NAT-traversal attempt records older than their TTL.
    fn spawn_traversal_gc_loop(&self) -> JoinHandle<()> {
        let traversal = Arc::clone(&self.traversal);
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(traversal.refresh_interval());
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                    }
                    _ = tick.tick() => {
                        traversal.garbage_collect();
                    }
                }
            }
        })
    }

    /// Samples CPU/memory and retunes the polling cadence every 10 seconds.
    fn spawn_energy_loop(&self) -> JoinHandle<()> {
        let energy = Arc::clone(&self.energy);
        let events = Arc::clone(&self.events);
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(energy.sample_interval());
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                    }
                    _ = tick.tick() => {
                        let (_, exceeded) = energy.sample();
                        if exceeded {
                            let _ = events.publish(Event::new(EventType::PerformanceWarning, "energy"));
                        }
                    }
                }
            }
        })
    }

    /// Writes the status snapshot to disk every 10 seconds.
    fn spawn_status_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let path = self.shared.config.status_file_path();
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            let snapshot = shared.status_snapshot(false).await;
                            let _ = status::write_atomic(&path, &snapshot).await;
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        let snapshot = shared.status_snapshot(true).await;
                        if let Err(e) = status::write_atomic(&path, &snapshot).await {
                            tracing::warn!("failed to write status snapshot: {e}");
                        }
                    }
                }
            }
        })
    }

    /// Accepts inbound QUIC connections and, per connection, the streams
    /// the remote side opens on them, dispatching each to the
    /// `/xelvra/1.0.0` handler. A no-op loop if QUIC never bound.
    fn spawn_quic_accept_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let endpoint = Arc::clone(&self.endpoint);
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let Some(quic) = shared.quic_transport.lock().clone() else {
                return;
            };
            loop {
                let accepted = tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                        continue;
                    }
                    accepted = quic.accept() => accepted,
                };
                match accepted {
                    Ok(connection) => {
                        let endpoint = Arc::clone(&endpoint);
                        let shared = Arc::clone(&shared);
                        let mut cancel = cancel.clone();
                        tokio::spawn(async move {
                            loop {
                                let stream = tokio::select! {
                                    _ = cancel.changed() => {
                                        if *cancel.borrow() { break; }
                                        continue;
                                    }
                                    stream = connection.accept_stream() => stream,
                                };
                                let Ok(mut stream) = stream else { break };
                                shared.messages_processed.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) =
                                    endpoint.handle_inbound(connection.remote_peer(), stream.as_mut()).await
                                {
                                    tracing::debug!("inbound QUIC stream handling failed: {e}");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("QUIC accept failed: {e}");
                    }
                }
            }
        })
    }

    /// Accepts inbound TCP connections, treating each as a single
    /// `/xelvra/1.0.0` stream per spec §6. A no-op loop if TCP never bound.
    fn spawn_tcp_accept_loop(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let endpoint = Arc::clone(&self.endpoint);
        let mut cancel = self.cancel_rx.clone();
        tokio::spawn(async move {
            let Some(listener) = shared.tcp_listener.lock().clone() else {
                return;
            };
            loop {
                let accepted = tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() { break; }
                        continue;
                    }
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((peer_id, mut stream)) => {
                        shared.messages_processed.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = endpoint.handle_inbound(peer_id, stream.as_mut()).await {
                            tracing::debug!("inbound TCP stream handling failed: {e}");
                        }
                    }
                    Err(e) => {
                        tracing::debug!("TCP accept failed: {e}");
                    }
                }
            }
        })
    }

    /// Signal cancellation, stop subcomponents, mark the snapshot
    /// `running = false`, and release identity key material.
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("stopping node");
        let _ = self.events.publish(Event::new(EventType::NodeStopping, "node"));
        let _ = self.cancel_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    pub fn record_message_processed(&self) {
        self.shared.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn status_snapshot(&self) -> NodeStatus {
        self.shared.status_snapshot(!*self.cancel_rx.borrow()).await
    }

    pub async fn write_status_snapshot(&self) -> Result<()> {
        let snapshot = self.status_snapshot().await;
        status::write_atomic(&self.shared.config.status_file_path(), &snapshot).await
    }
}

/// Dial each configured bootstrap entry once. A successful dial folds the
/// remote into the routing table and the discovery arbiter under a
/// placeholder identity (see `PeerId::from_addr_hash`) since bootstrap
/// entries are plain addresses, not identities, until the peer's own
/// advertisement is observed by another discovery method.
async fn bootstrap_overlay(
    bootstrap: &Bootstrap,
    transports: &TransportManager,
    routing_table: &RoutingTable,
    discovery_arbiter: &DiscoveryArbiter,
    discovery_cache: &LocalPeerCache,
    events: &EventBus,
) {
    for entry in &bootstrap.entry_peers {
        let Ok(addr) = entry.parse::<SocketAddr>() else {
            tracing::warn!("ignoring unparseable bootstrap entry '{entry}'");
            continue;
        };
        let placeholder_id = PeerId::from_addr_hash(&addr);
        match transports.connect(placeholder_id, &[addr]).await {
            Ok(_connection) => {
                routing_table.insert(placeholder_id);
                let is_new = discovery_arbiter.merge(placeholder_id, vec![addr], crate::net::discovery::PeerSource::Overlay);
                discovery_cache.add(PeerRecord::new(placeholder_id, vec![addr], crate::net::discovery::PeerSource::Overlay));
                if is_new {
                    let _ = events.publish(
                        Event::new(EventType::PeerDiscovered, "overlay")
                            .with("peer_id", placeholder_id.to_string()),
                    );
                }
            }
            Err(e) => {
                tracing::debug!("bootstrap dial to {entry} failed: {e}");
            }
        }
    }
    bootstrap.mark_completed();
}

fn system_time_secs(instant: Instant) -> u64 {
    let now_instant = Instant::now();
    let elapsed = now_instant.saturating_duration_since(instant);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .saturating_sub(elapsed)
        .as_secs()
}

fn estimate_network_quality(nat: &NatStatus) -> NetworkQuality {
    use crate::net::nat::NatType;
    match nat.nat_type {
        NatType::Open | NatType::FullCone => NetworkQuality::Excellent,
        NatType::RestrictedCone | NatType::PortRestricted => NetworkQuality::Good,
        NatType::Symmetric => NetworkQuality::Fair,
        NatType::Unknown => NetworkQuality::Unknown,
    }
}

#[async_trait::async_trait]
impl Component for Node {
    async fn start(&self) -> Result<()> {
        Node::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        Node::stop(self).await
    }

    fn health_check(&self) -> HealthStatus {
        if *self.cancel_rx.borrow() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_snapshot_reports_running_while_active() {
        let identity = Identity::generate(4).unwrap();
        let node = Node::new(NodeConfig::default(), identity);
        let snapshot = node.status_snapshot().await;
        assert!(snapshot.is_running);
        assert_eq!(snapshot.peer_id, node.peer_id().to_string());
    }

    #[tokio::test]
    async fn stop_marks_snapshot_not_running() {
        let identity = Identity::generate(4).unwrap();
        let node = Node::new(NodeConfig::default(), identity);
        node.stop().await.unwrap();
        let snapshot = node.status_snapshot().await;
        assert!(!snapshot.is_running);
    }
}
