//! Binary entry point for the zkv server daemon.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zkv_common::DEFAULT_PORT;
use zkv_server::{Server, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "zkvd", about = "In-memory key/value server with sorted sets and TTLs")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// TCP port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds of inactivity before a connection is dropped.
    #[arg(long, default_value_t = 60)]
    idle_timeout_secs: u64,

    /// Worker threads for deferred teardown of large values.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        addr: SocketAddr::new(args.host, args.port),
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        workers: args.workers,
    };

    let mut server = Server::bind(config)?;
    server.run()?;
    Ok(())
}
