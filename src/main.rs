// Xelvra node binary: loads configuration, loads or mines the host
// identity, starts the node core, and waits for a shutdown signal.

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use xelvra_node::config::NodeConfig;
use xelvra_node::identity::Identity;
use xelvra_node::node::Node;
use xelvra_node::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    print_banner();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("xelvra.toml"));
    let config = NodeConfig::load(&config_path)?;

    info!(data_dir = %config.data_dir.display(), "loading node configuration");

    let identity = Identity::load_or_generate(&config.identity_file_path(), config.pow_difficulty)?;
    info!(did = %identity.did(), "node identity ready");

    let node = Node::new(config, identity);
    node.start().await?;

    let mut cancel = node.cancellation();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = cancel.changed() => {}
    }

    if let Err(e) = node.stop().await {
        error!("error while stopping node: {e}");
    }

    info!("node stopped");
    Ok(())
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  Xelvra P2P Messaging Node                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}
