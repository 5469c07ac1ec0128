//! CollabX relay: forwards document frames between peers.
//!
//! Serves `/ws/{doc_id}`; every binary frame a member sends is forwarded to
//! all other members of the same room. Logging defaults to `info` and can
//! be tuned with `RUST_LOG`.

use clap::Parser;
use log::info;

use collabx_sync::{RelayConfig, RelayServer};

/// Relay command line arguments.
#[derive(Parser, Debug)]
#[command(name = "collabx-relay")]
#[command(version)]
#[command(about = "WebSocket relay for CollabX document sessions")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "COLLABX_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Frames buffered per member before a slow member starts losing them
    #[arg(long, env = "COLLABX_CAPACITY", default_value_t = 256)]
    capacity: usize,

    /// Maximum connections per room
    #[arg(long, env = "COLLABX_MAX_PEERS", default_value_t = 100)]
    max_peers: usize,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = RelayConfig {
        bind_addr: args.bind,
        broadcast_capacity: args.capacity,
        max_peers_per_room: args.max_peers,
    };
    config.validate()?;

    info!(
        "Starting CollabX relay (capacity {}, max {} peers per room)",
        config.broadcast_capacity, config.max_peers_per_room
    );
    RelayServer::new(config).run().await?;
    Ok(())
}
