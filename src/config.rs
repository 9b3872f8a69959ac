// Node configuration.
//
// Grounded on the teacher's `DatabaseConfig` (a flat, `Default`-backed struct
// loaded once at startup) and cadence's `config.rs` (TOML on disk, `dirs` for
// the data directory). Parsing/validating arbitrary on-disk layouts is out of
// scope (spec §1); this is the minimal loader every node binary needs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Proof-of-work difficulty used when generating a fresh identity.
    pub pow_difficulty: u8,

    /// Directory holding the identity key file and status snapshot.
    /// Defaults to `$HOME/.xelvra`.
    pub data_dir: PathBuf,

    /// Transport-layer bind ports.
    pub quic_port: u16,
    pub tcp_port: u16,

    /// STUN servers queried in order by the NAT detector.
    pub stun_servers: Vec<String>,

    /// Structured-overlay / DHT bootstrap entries (transport-specific address
    /// strings; the core ships a default set but callers may override it).
    pub bootstrap_peers: Vec<String>,

    /// Capacity bounds (spec §5: "configuration, not wired constants").
    pub local_peer_cache_capacity: usize,
    pub connection_pool_capacity: usize,
    pub connection_pool_max_age_secs: u64,
    pub event_buffer_capacity: usize,
    pub event_worker_count: usize,

    /// Energy governor thresholds.
    pub deep_sleep_battery_threshold: f32,
    pub idle_memory_target_mb: f64,
    pub idle_cpu_target_pct: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pow_difficulty: 16,
            data_dir: default_data_dir(),
            quic_port: 9000,
            tcp_port: 9001,
            stun_servers: vec![
                "stun.l.google.com:19302".to_string(),
                "stun1.l.google.com:19302".to_string(),
                "stun2.l.google.com:19302".to_string(),
            ],
            bootstrap_peers: Vec::new(),
            local_peer_cache_capacity: 100,
            connection_pool_capacity: 100,
            connection_pool_max_age_secs: 1800,
            event_buffer_capacity: 1000,
            event_worker_count: 4,
            deep_sleep_battery_threshold: 0.15,
            idle_memory_target_mb: 20.0,
            idle_cpu_target_pct: 1.0,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xelvra")
}

impl NodeConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist. Unknown fields are ignored for forward
    /// compatibility; missing fields fall back to `Default`.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn status_file_path(&self) -> PathBuf {
        self.data_dir.join("node_status.json")
    }

    pub fn identity_file_path(&self) -> PathBuf {
        self.data_dir.join("identity.key")
    }
}
