//! Command line interface for the `peerwire` demonstration node.
//!
//! Kept free of library types so the build script can render a man page
//! from it.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `peerwire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "peerwire",
    version,
    about = "Demonstration node exchanging pings over a peerwire pool"
)]
pub struct Cli {
    /// Address to accept peers on.
    #[arg(short, long, default_value = "0.0.0.0:8333")]
    pub listen: SocketAddr,

    /// Peer to dial at start-up. May be repeated.
    #[arg(short = 'c', long = "connect", value_name = "ADDR")]
    pub peers: Vec<String>,

    /// Largest number of simultaneous connections.
    #[arg(long, default_value_t = 125)]
    pub max_connections: usize,

    /// Largest frame a peer may send, in bytes.
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    pub max_message_length: usize,

    /// Seconds without sending before a keepalive ping is queued.
    #[arg(long, default_value_t = 30)]
    pub ping_interval: u64,

    /// Seconds without receiving before a peer is dropped.
    #[arg(long, default_value_t = 120)]
    pub stale_after: u64,

    /// Log every frame sent and received.
    #[arg(short, long)]
    pub debug: bool,

    /// Address for the Prometheus metrics endpoint.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}
