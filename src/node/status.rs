// Externally observable status snapshot, written atomically (temp file +
// rename) to `$HOME/.xelvra/node_status.json`.
//
// New code grounded on the "atomic rename" guarantee language already
// present in spec §5/§6, implemented with `tokio::fs` the way the teacher's
// `main.rs` treats its own on-disk artifacts as write-then-rename targets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::net::nat::NatStatus as InternalNatStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub name: String,
    pub active_connections: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatInfo {
    pub nat_type: String,
    pub reflexive_ip: Option<String>,
    pub reflexive_port: Option<u16>,
}

impl From<&InternalNatStatus> for NatInfo {
    fn from(status: &InternalNatStatus) -> Self {
        Self {
            nat_type: format!("{:?}", status.nat_type),
            reflexive_ip: status.reflexive_ip.map(|ip| ip.to_string()),
            reflexive_port: status.reflexive_port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub mdns_active: bool,
    pub dht_active: bool,
    pub udp_active: bool,
    pub known_peer_count: usize,
}

/// Byte-exact field names required by spec §6; do not rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub peer_id: String,
    pub listen_addrs: Vec<String>,
    pub connected_peers: usize,
    pub uptime_seconds: u64,
    pub messages_processed: u64,
    pub start_time: u64,
    pub last_update: u64,
    pub process_id: u32,
    pub is_running: bool,
    pub transports: Vec<TransportDescriptor>,
    pub nat_info: NatInfo,
    pub discovery: DiscoveryInfo,
    pub network_quality: NetworkQuality,
}

/// Write atomically: write to a sibling temp file, then rename over the
/// target. Readers see either the fully-written file or the previous one.
pub async fn write_atomic(path: &Path, status: &NodeStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let contents = serde_json::to_vec_pretty(status)?;
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> NodeStatus {
        NodeStatus {
            peer_id: "did:xelvra:deadbeef".into(),
            listen_addrs: vec!["127.0.0.1:9000".into()],
            connected_peers: 0,
            uptime_seconds: 0,
            messages_processed: 0,
            start_time: 0,
            last_update: 0,
            process_id: std::process::id(),
            is_running: true,
            transports: vec![],
            nat_info: NatInfo {
                nat_type: "Unknown".into(),
                reflexive_ip: None,
                reflexive_port: None,
            },
            discovery: DiscoveryInfo {
                mdns_active: false,
                dht_active: false,
                udp_active: false,
                known_peer_count: 0,
            },
            network_quality: NetworkQuality::Unknown,
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_status.json");
        write_atomic(&path, &sample_status()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: NodeStatus = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_running);
        assert_eq!(parsed.peer_id, "did:xelvra:deadbeef");
    }

    #[tokio::test]
    async fn no_temp_file_survives_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_status.json");
        write_atomic(&path, &sample_status()).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    /// P10: the on-disk snapshot carries every top-level field the spec
    /// names, and `last_update` is fresh (within 15s of the write).
    #[tokio::test]
    async fn snapshot_has_required_fields_and_fresh_last_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_status.json");
        let mut status = sample_status();
        status.last_update = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        write_atomic(&path, &status).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        let object = value.as_object().unwrap();
        for field in [
            "peer_id",
            "listen_addrs",
            "connected_peers",
            "uptime_seconds",
            "messages_processed",
            "start_time",
            "last_update",
            "process_id",
            "is_running",
            "transports",
            "nat_info",
            "discovery",
            "network_quality",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let last_update = object["last_update"].as_u64().unwrap();
        assert!(now.saturating_sub(last_update) <= 15);
    }
}
