//! rendezvous-rs
//!
//! UDP rendezvous server for NAT hole punching. Clients behind NAT register
//! here, learn their own public port and their peers' addresses, then talk
//! to each other directly.
//!
//! Usage:
//!   rendezvous-rs --bind 0.0.0.0:20400
//!   rendezvous-rs --protocol group --traffic-log ./logs.txt

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use rendezvous_rs::engine::ProtocolMode;
use rendezvous_rs::server::{self, ServerConfig};

#[derive(Clone, Copy, ValueEnum, Default)]
enum Protocol {
    /// 1-host/N-guest rendezvous: guests fetch the host's address
    #[default]
    HostGuest,
    /// N-way group rendezvous with a peer-exchange broadcast
    Group,
}

impl From<Protocol> for ProtocolMode {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::HostGuest => ProtocolMode::HostGuest,
            Protocol::Group => ProtocolMode::Group,
        }
    }
}

#[derive(Parser)]
#[command(name = "rendezvous-rs")]
#[command(version)]
#[command(about = "UDP rendezvous server for NAT hole punching")]
struct Args {
    /// Address to bind the UDP socket
    #[arg(short, long, default_value = "0.0.0.0:20400")]
    bind: SocketAddr,

    /// Protocol variant to serve
    #[arg(short, long, default_value = "host-guest")]
    protocol: Protocol,

    /// Append every inbound and outbound datagram to this file
    /// (truncated to empty once it exceeds 10 MiB)
    #[arg(long)]
    traffic_log: Option<PathBuf>,

    /// Remove sessions older than this many hours
    #[arg(long, default_value_t = 24)]
    session_max_age_hours: u64,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    server::run(ServerConfig {
        bind: args.bind,
        mode: args.protocol.into(),
        traffic_log: args.traffic_log,
        session_max_age: Duration::from_secs(args.session_max_age_hours * 3600),
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
    })
    .await
}
