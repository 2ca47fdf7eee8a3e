//! FerroKV Server Binary
//!
//! Starts the TCP server for FerroKV.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ferrokv::network::Server;
use ferrokv::{Config, Engine};

/// FerroKV Server
#[derive(Parser, Debug)]
#[command(name = "ferrokv-server")]
#[command(about = "Embeddable LSM-tree key-value store with a TCP server")]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ferrokv_data")]
    data_dir: String,

    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    listen: String,

    /// MemTable entry-count limit before a flush is triggered
    #[arg(long, default_value_t = 1000)]
    memtable_max_entries: usize,

    /// Number of SSTables that triggers a full-merge compaction
    #[arg(long, default_value_t = 10)]
    compaction_threshold: usize,

    /// Max concurrent client connections
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(args.listen.clone())
        .memtable_max_entries(args.memtable_max_entries)
        .compaction_threshold(args.compaction_threshold)
        .max_connections(args.max_connections)
        .build();

    let engine = match Engine::open(config.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!("Failed to open engine at {}: {}", args.data_dir, e);
            std::process::exit(1);
        }
    };

    tracing::info!("FerroKV engine opened at {}", args.data_dir);

    let mut server = Server::new(config, engine);
    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
