//! UDP serve loop.
//!
//! A single task owns the socket, the protocol engine, and the registries;
//! each inbound datagram is fully processed before the next one, so the
//! registries need no locking. Scheduled peer exchanges re-enter the loop
//! through an mpsc channel instead of blocking the dispatch path, and the
//! expiry sweep runs on a timer in the same loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::clock::Instant;
use crate::engine::{Datagram, Engine, ProtocolMode};
use crate::wirelog::TrafficLog;

/// Grace delay between a completing registration and the peer-exchange
/// broadcast, so the registering client's acknowledgment arrives before its
/// peer list does.
pub const EXCHANGE_GRACE: Duration = Duration::from_millis(250);

/// Receive buffer size. Protocol messages are tiny; anything larger is cut
/// off and fails parsing.
const MAX_DATAGRAM: usize = 2048;

/// Runtime settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub mode: ProtocolMode,
    /// Traffic log path; `None` disables the log.
    pub traffic_log: Option<PathBuf>,
    pub session_max_age: Duration,
    pub sweep_interval: Duration,
}

/// UDP rendezvous server: socket plus protocol engine.
pub struct Server {
    socket: UdpSocket,
    engine: Engine,
    traffic: Option<TrafficLog>,
    session_max_age: Duration,
    sweep_interval: Duration,
}

impl Server {
    /// Bind the UDP socket and prepare the engine.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", config.bind))?;
        let local = socket.local_addr().context("No local address")?;
        info!("rendezvous server listening on {local}");

        let traffic = config.traffic_log.map(TrafficLog::new);
        if let Some(log) = &traffic {
            let started = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            log.record("============================================");
            log.record(&format!("server started at unix {started}"));
            log.record(&format!("listening on {local}"));
        }

        Ok(Self {
            socket,
            engine: Engine::new(config.mode),
            traffic,
            session_max_age: config.session_max_age,
            sweep_interval: config.sweep_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run the serve loop until the process ends.
    pub async fn run(mut self) -> Result<()> {
        let (exchange_tx, mut exchange_rx) = mpsc::channel::<String>(64);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("recv error: {err}");
                            continue;
                        }
                    };
                    if let Some(log) = &self.traffic {
                        log.record(&format!("recv {from} {}", String::from_utf8_lossy(&buf[..len])));
                    }

                    let dispatch = self.engine.handle_datagram(&buf[..len], from);
                    self.send_all(&dispatch.outbound).await;

                    for session_id in dispatch.scheduled_exchanges {
                        let tx = exchange_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(EXCHANGE_GRACE).await;
                            // The receiver lives as long as the loop does.
                            let _ = tx.send(session_id).await;
                        });
                    }
                }

                Some(session_id) = exchange_rx.recv() => {
                    let broadcasts = self.engine.run_exchange(&session_id);
                    self.send_all(&broadcasts).await;
                }

                _ = sweep.tick() => {
                    let removed = self.engine.sweep(Instant::now(), self.session_max_age);
                    if removed > 0 {
                        info!("sweep removed {removed} expired session(s)");
                    }
                }
            }
        }
    }

    /// Fire-and-forget sends: delivery failure is logged and otherwise
    /// invisible to the protocol.
    async fn send_all(&self, datagrams: &[Datagram]) {
        for datagram in datagrams {
            if let Some(log) = &self.traffic {
                log.record(&format!("send {} {}", datagram.to, datagram.payload));
            }
            if let Err(err) = self
                .socket
                .send_to(datagram.payload.as_bytes(), datagram.to)
                .await
            {
                warn!("send to {} failed: {err}", datagram.to);
            }
        }
    }
}

/// Bind and run with the given settings (convenience for the binary).
pub async fn run(config: ServerConfig) -> Result<()> {
    Server::bind(config).await?.run().await
}
