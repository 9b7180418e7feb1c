//! Flock server
//!
//! The server owns the rendezvous listener, admits clients through the
//! handshake, and hands every accepted client to a session. Inbound packets
//! from all sessions funnel into one queue for the simulation loop to drain;
//! outbound state flows the other way through per-session broadcast queues.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::handshake::{self, HandshakeError};
use super::registry::Registry;
use super::session::{InboundPacket, Session, TerminateFlag};
use super::NetworkConfig;
use crate::protocol::{Boid, Packet, SnapshotError};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Flock server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Live sessions
    registry: Arc<Registry>,
    /// Shutdown signal shared with every session
    stop: TerminateFlag,
    /// Inbound packet sender, cloned into each session
    inbound_tx: mpsc::UnboundedSender<InboundPacket>,
    /// Inbound packet receiver (for the simulation loop)
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundPacket>>,
    /// Accept loop task
    accept_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Self {
            config,
            registry: Arc::new(Registry::new()),
            stop: TerminateFlag::new(),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            accept_task: None,
        }
    }

    /// Take the inbound packet receiver (can only be called once)
    pub fn take_inbound_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<InboundPacket>> {
        self.inbound_rx.take()
    }

    /// Start the rendezvous listener and the accept loop
    ///
    /// Returns the bound address, which matters when the configured port is 0
    /// and the OS picks one.
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        // A fresh flag so a stopped server can be started again
        self.stop = TerminateFlag::new();

        let bind_addr = self.config.rendezvous_addr();
        let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let registry = self.registry.clone();
        let inbound_tx = self.inbound_tx.clone();
        let stop = self.stop.clone();
        let config = self.config.clone();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.wait() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let registry = registry.clone();
                                let inbound_tx = inbound_tx.clone();
                                let stop = stop.clone();
                                let config = config.clone();

                                tokio::spawn(async move {
                                    if let Err(e) = admit_session(
                                        stream,
                                        addr,
                                        registry,
                                        inbound_tx,
                                        stop,
                                        config,
                                    ).await {
                                        tracing::warn!("Handshake with {} failed: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                }
            }
        }));

        Ok(local_addr)
    }

    /// Sweep dead sessions, then broadcast the current state to the rest
    ///
    /// Returns how many sessions the snapshot was queued for. Encoding
    /// happens once; every session receives a cheap copy.
    pub async fn broadcast_state(&self, boids: &[Boid]) -> ServerResult<usize> {
        for removed in self.registry.sweep().await {
            tracing::info!("Session {} ({}) removed", removed.id(), removed.peer_addr());
        }

        if self.registry.is_empty().await {
            return Ok(0);
        }

        let packet = Packet::boids_state(boids)?;
        Ok(self.registry.broadcast(&packet).await)
    }

    /// Stop the server
    ///
    /// Says goodbye to every session, bounded by the shutdown timeout, and
    /// force-terminates the ones that do not drain in time.
    pub async fn stop(&mut self) -> ServerResult<()> {
        let accept_task = self.accept_task.take().ok_or(ServerError::NotRunning)?;

        self.stop.set();

        let wait = Duration::from_millis(self.config.shutdown_timeout_ms);
        for handle in self.registry.handles().await {
            if let Err(e) = handle.close_graceful(wait).await {
                tracing::warn!(
                    "Session {} did not drain cleanly ({}), terminating",
                    handle.id(),
                    e
                );
                handle.terminate();
            }
        }
        self.registry.sweep().await;

        let _ = accept_task.await;
        tracing::info!("Server stopped");

        Ok(())
    }

    /// Number of registered sessions, terminated ones included until swept
    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    /// Whether the accept loop is running
    pub fn is_running(&self) -> bool {
        self.accept_task.is_some() && !self.stop.is_set()
    }
}

/// Admit one accepted rendezvous connection as a session
async fn admit_session(
    control: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    inbound_tx: mpsc::UnboundedSender<InboundPacket>,
    stop: TerminateFlag,
    config: NetworkConfig,
) -> Result<(), HandshakeError> {
    let (outbound, inbound) = handshake::handshake_server(control, peer, &config).await?;

    if stop.is_set() {
        tracing::debug!("Dropping session with {} established during shutdown", peer);
        return Ok(());
    }

    let id = registry.allocate_id();
    // The server reads commands off the client-to-server leg and writes
    // state on the server-to-client leg
    let session = Session::new(id, peer, inbound, outbound);
    let handle = session.spawn(inbound_tx, stop, &config);
    registry.insert(handle).await;

    tracing::info!("Session {} established with {}", id, peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_packet, PacketKind};

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            port: 0,
            connect_timeout_ms: 1000,
            handshake_timeout_ms: 1000,
            shutdown_timeout_ms: 1000,
            ..Default::default()
        }
    }

    async fn wait_for_sessions(server: &Server, count: usize) {
        for _ in 0..200 {
            if server.session_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} sessions", count);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut server = Server::new(test_config());
        assert!(!server.is_running());

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running());
        assert!(matches!(server.stop().await, Err(ServerError::NotRunning)));
    }

    #[tokio::test]
    async fn test_admits_clients_through_handshake() {
        let config = test_config();
        let mut server = Server::new(config.clone());
        let addr = server.start().await.unwrap();

        let _legs = handshake::handshake_client(addr, &config).await.unwrap();
        wait_for_sessions(&server, 1).await;

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_state_reaches_client() {
        let config = test_config();
        let mut server = Server::new(config.clone());
        let addr = server.start().await.unwrap();

        let (mut client_read, _client_write) =
            handshake::handshake_client(addr, &config).await.unwrap();
        wait_for_sessions(&server, 1).await;

        let boids = [Boid::new(1, 10.0, 20.0, 1.0, -1.0)];
        assert_eq!(server.broadcast_state(&boids).await.unwrap(), 1);

        let packet = read_packet(&mut client_read).await.unwrap();
        assert_eq!(packet.kind, PacketKind::BoidsState);
        assert_eq!(packet.parse_boids_state().unwrap(), boids.to_vec());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_without_sessions_is_zero() {
        let mut server = Server::new(test_config());
        server.start().await.unwrap();

        let delivered = server.broadcast_state(&[]).await.unwrap();
        assert_eq!(delivered, 0);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_says_goodbye() {
        let config = test_config();
        let mut server = Server::new(config.clone());
        let addr = server.start().await.unwrap();

        let (mut client_read, _client_write) =
            handshake::handshake_client(addr, &config).await.unwrap();
        wait_for_sessions(&server, 1).await;

        server.stop().await.unwrap();

        let packet = read_packet(&mut client_read).await.unwrap();
        assert_eq!(packet.kind, PacketKind::Exit);
    }
}
