//! Flock client
//!
//! Connects to a flock server, runs the session over the negotiated leg
//! pair, and turns the server's packet stream into typed events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use super::handshake::{self, HandshakeError};
use super::session::{
    InboundPacket, Session, SessionError, SessionHandle, SessionId, TerminateFlag,
};
use super::NetworkConfig;
use crate::protocol::{Boid, Packet, PacketKind};

/// The client's own session id; server-assigned ids start at 1
const LOCAL_SESSION_ID: SessionId = SessionId(0);

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected to a server
    Connected { server_addr: SocketAddr },
    /// A state snapshot arrived
    Snapshot { boids: Vec<Boid> },
    /// The server reported an error
    ServerError { message: String },
    /// The session ended, whichever side initiated it
    Disconnected,
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Flock client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Current state
    state: Arc<RwLock<ClientState>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Handle for queueing packets to the server
    session: Arc<RwLock<Option<SessionHandle>>>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to a server by address
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ClientState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ClientState::Connecting;
        }

        tracing::info!("Connecting to {}", server_addr);

        let (read_leg, write_leg) =
            match handshake::handshake_client(server_addr, &self.config).await {
                Ok(legs) => legs,
                Err(e) => {
                    let mut state = self.state.write().await;
                    *state = ClientState::Disconnected;
                    return Err(ClientError::Handshake(e));
                }
            };

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundPacket>();
        let session = Session::new(LOCAL_SESSION_ID, server_addr, read_leg, write_leg);
        let handle = session.spawn(inbound_tx, TerminateFlag::new(), &self.config);

        {
            let mut slot = self.session.write().await;
            *slot = Some(handle.clone());
        }
        {
            let mut state = self.state.write().await;
            *state = ClientState::Connected;
        }

        let _ = self
            .event_tx
            .send(ClientEvent::Connected { server_addr })
            .await;

        tracing::info!("Connected to {}", server_addr);

        // Spawn the event loop: packets in, events out, until termination
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let session_slot = self.session.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    inbound = inbound_rx.recv() => {
                        match inbound {
                            Some(inbound) => forward_packet(inbound.packet, &event_tx).await,
                            None => break,
                        }
                    }
                    _ = handle.wait_terminated() => {
                        break;
                    }
                }
            }

            {
                let mut slot = session_slot.write().await;
                *slot = None;
            }
            {
                let mut state = state.write().await;
                *state = ClientState::Disconnected;
            }

            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Connect to a server by hostname
    pub async fn connect_hostname(&self, hostname: &str, port: u16) -> ClientResult<()> {
        let addr = super::resolve_host(hostname, port).await?;
        self.connect(addr).await
    }

    /// Ask the server to add a boid to the flock
    pub async fn send_add(&self, boid: &Boid) -> ClientResult<()> {
        self.send(Packet::add_boid(boid)).await
    }

    /// Ask the server to remove a boid from the flock
    pub async fn send_remove(&self, boid_id: u32) -> ClientResult<()> {
        self.send(Packet::remove_boid(boid_id)).await
    }

    /// Queue a packet for the server
    pub async fn send(&self, packet: Packet) -> ClientResult<()> {
        let session = self.session.read().await;
        match &*session {
            Some(handle) => Ok(handle.enqueue(packet)?),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Disconnect from the server
    ///
    /// Says goodbye and waits (bounded) for it to reach the wire, then
    /// force-terminates if the session would not drain.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let handle = self.session.read().await.clone();
        let handle = handle.ok_or(ClientError::NotConnected)?;

        let wait = Duration::from_millis(self.config.shutdown_timeout_ms);
        if let Err(e) = handle.close_graceful(wait).await {
            tracing::warn!("Session did not drain cleanly ({}), terminating", e);
            handle.terminate();
        }

        Ok(())
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ClientState::Connected
    }
}

/// Translate one server packet into a client event
async fn forward_packet(packet: Packet, event_tx: &mpsc::Sender<ClientEvent>) {
    match packet.kind {
        PacketKind::BoidsState => match packet.parse_boids_state() {
            Ok(boids) => {
                let _ = event_tx.send(ClientEvent::Snapshot { boids }).await;
            }
            Err(e) => {
                tracing::warn!("Discarding malformed state snapshot: {}", e);
            }
        },
        PacketKind::Error => {
            let message = packet.parse_error();
            tracing::warn!("Server reported an error: {}", message);
            let _ = event_tx.send(ClientEvent::ServerError { message }).await;
        }
        other => {
            tracing::debug!("Ignoring unexpected {:?} packet from server", other);
        }
    }
}
