//! Network module - Handles TCP communication between server and clients
//!
//! Provides:
//! - Rendezvous handshake that negotiates a fresh port pair per client
//! - Session worker loops over the two negotiated legs
//! - Server with a session registry and per-tick snapshot broadcast
//! - Client for connecting to a server

mod client;
mod handshake;
mod registry;
mod server;
mod session;

pub use client::*;
pub use handshake::*;
pub use registry::*;
pub use server::*;
pub use session::*;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Rendezvous port to listen on or connect to
    pub port: u16,
    /// Address the server binds its listeners to
    pub bind_address: IpAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Bound on the rendezvous exchange and the two data-leg accepts
    pub handshake_timeout_ms: u64,
    /// Inbound loop read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Outbound loop idle wait in milliseconds
    pub poll_interval_ms: u64,
    /// Bound on draining the goodbye packet during shutdown
    pub shutdown_timeout_ms: u64,
    /// Outbound queue depth per session
    pub queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            read_timeout_ms: 2000,
            poll_interval_ms: 100,
            shutdown_timeout_ms: 1000,
            queue_capacity: 256,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// The rendezvous address the server listens on
    pub fn rendezvous_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
