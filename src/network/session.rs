//! Session handling for FlockNet
//!
//! A session is the per-connection runtime: two worker loops (one per
//! physical TCP leg), a bounded FIFO outbound queue, and a shared terminate
//! flag. The loops never share the sockets; the inbound loop owns the read
//! leg, the outbound loop owns the write leg, and each closes its socket by
//! dropping it when the loop exits.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

use super::NetworkConfig;
use crate::protocol::{
    read_packet_timeout, write_packet, FrameError, Packet, PacketKind, HEADER_SIZE,
    MAX_FRAME_SIZE,
};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is terminated")]
    Terminated,

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Timed out draining the goodbye packet")]
    DrainTimeout,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Identifier for one session, unique within its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cooperative cancellation flag shared by a session's loops
///
/// An atomic bool paired with a notifier, so shutdown paths can await the
/// flip instead of polling. Setting is idempotent; the flag never resets.
#[derive(Debug, Clone, Default)]
pub struct TerminateFlag {
    inner: Arc<TerminateInner>,
}

#[derive(Debug, Default)]
struct TerminateInner {
    set: AtomicBool,
    notify: Notify,
}

impl TerminateFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the flag and wake every waiter
    pub fn set(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.inner.notify.notified();
            // Re-check after registering, so a set between the check and the
            // registration cannot be missed
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// One packet pulled off a session's wire, tagged with its origin
#[derive(Debug)]
pub struct InboundPacket {
    pub session: SessionId,
    pub packet: Packet,
}

/// An established connection pair, ready to run
///
/// `read` carries peer-to-us traffic, `write` carries us-to-peer traffic.
/// Both sides of the protocol build the same Session from their own ends of
/// the two negotiated legs.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    read: TcpStream,
    write: TcpStream,
}

impl Session {
    pub fn new(id: SessionId, peer: SocketAddr, read: TcpStream, write: TcpStream) -> Self {
        Self {
            id,
            peer,
            read,
            write,
        }
    }

    /// Start the two worker loops and return the handle for steering them
    ///
    /// Decoded packets (except the goodbye) land on `inbound_tx`. The loops
    /// stop when the session terminates or, for the inbound loop, when the
    /// global `stop` flag flips.
    pub fn spawn(
        self,
        inbound_tx: mpsc::UnboundedSender<InboundPacket>,
        stop: TerminateFlag,
        config: &NetworkConfig,
    ) -> SessionHandle {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let terminate = TerminateFlag::new();

        tokio::spawn(run_inbound(
            self.read,
            self.id,
            inbound_tx,
            terminate.clone(),
            stop,
            Duration::from_millis(config.read_timeout_ms),
        ));

        tokio::spawn(run_outbound(
            self.write,
            self.id,
            queue_rx,
            terminate.clone(),
            Duration::from_millis(config.poll_interval_ms),
        ));

        SessionHandle {
            id: self.id,
            peer: self.peer,
            queue: queue_tx,
            terminate,
        }
    }
}

/// A handle for feeding and terminating one session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
    queue: mpsc::Sender<Packet>,
    terminate: TerminateFlag,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a packet for transmission without waiting
    ///
    /// Oversized packets are refused here, before anything hits the wire;
    /// the session stays alive. A full queue is reported to the caller, who
    /// decides whether the packet matters enough to retry.
    pub fn enqueue(&self, packet: Packet) -> SessionResult<()> {
        if self.terminate.is_set() {
            return Err(SessionError::Terminated);
        }

        let total = HEADER_SIZE + packet.payload.len();
        if total > MAX_FRAME_SIZE {
            return Err(SessionError::Frame(FrameError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            }));
        }

        match self.queue.try_send(packet) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Terminated),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_set()
    }

    /// Wait until the session has terminated
    pub async fn wait_terminated(&self) {
        self.terminate.wait().await;
    }

    /// Force-terminate without a goodbye
    pub fn terminate(&self) {
        self.terminate.set();
    }

    /// Say goodbye and wait for it to reach the wire
    ///
    /// Enqueues an `Exit` packet and waits (bounded) for the outbound loop
    /// to transmit it and flip the terminate flag. The sockets stay open
    /// until the loops exit, so the peer always gets a chance to observe the
    /// goodbye. On `DrainTimeout` the caller decides whether to force.
    pub async fn close_graceful(&self, wait: Duration) -> SessionResult<()> {
        if self.terminate.is_set() {
            return Ok(());
        }

        let drain = async {
            // A closed queue means the outbound loop already exited, which
            // only happens with the flag set or about to be set
            let _ = self.queue.send(Packet::exit()).await;
            self.terminate.wait().await;
        };

        tokio::time::timeout(wait, drain)
            .await
            .map_err(|_| SessionError::DrainTimeout)
    }
}

#[cfg(test)]
impl SessionHandle {
    /// Handle backed by a bare queue, for exercising bookkeeping without sockets
    pub(crate) fn detached(id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<Packet>) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        let handle = SessionHandle {
            id,
            peer: SocketAddr::from(([127, 0, 0, 1], 0)),
            queue: queue_tx,
            terminate: TerminateFlag::new(),
        };
        (handle, queue_rx)
    }
}

/// Inbound worker: decode frames and feed the shared application queue
async fn run_inbound(
    mut stream: TcpStream,
    id: SessionId,
    inbound_tx: mpsc::UnboundedSender<InboundPacket>,
    terminate: TerminateFlag,
    stop: TerminateFlag,
    read_timeout: Duration,
) {
    tracing::debug!("Session {}: inbound loop started", id);

    loop {
        if terminate.is_set() || stop.is_set() {
            break;
        }

        match read_packet_timeout(&mut stream, read_timeout).await {
            // Timeout: no event, re-check the flags
            Ok(None) => continue,
            Ok(Some(packet)) if packet.kind == PacketKind::Exit => {
                tracing::debug!("Session {}: peer said goodbye", id);
                terminate.set();
                break;
            }
            Ok(Some(packet)) => {
                if inbound_tx
                    .send(InboundPacket {
                        session: id,
                        packet,
                    })
                    .is_err()
                {
                    // Application dropped its end of the queue
                    terminate.set();
                    break;
                }
            }
            Err(FrameError::Disconnected) => {
                tracing::info!("Session {}: peer disconnected", id);
                terminate.set();
                break;
            }
            Err(e) => {
                tracing::warn!("Session {}: inbound error: {}", id, e);
                terminate.set();
                break;
            }
        }
    }

    tracing::debug!("Session {}: inbound loop exited", id);
}

/// Outbound worker: drain the FIFO queue onto the wire
async fn run_outbound(
    mut stream: TcpStream,
    id: SessionId,
    mut queue: mpsc::Receiver<Packet>,
    terminate: TerminateFlag,
    poll_interval: Duration,
) {
    tracing::debug!("Session {}: outbound loop started", id);

    loop {
        if terminate.is_set() {
            break;
        }

        match tokio::time::timeout(poll_interval, queue.recv()).await {
            // Idle: re-check the flag
            Err(_) => continue,
            // Every handle dropped; nothing can be enqueued anymore
            Ok(None) => {
                terminate.set();
                break;
            }
            Ok(Some(packet)) => {
                let saying_goodbye = packet.kind == PacketKind::Exit;

                match write_packet(&mut stream, &packet).await {
                    Ok(()) => {
                        if saying_goodbye {
                            // The sender is authoritative for "goodbye done":
                            // flip only after the frame reached the wire
                            tracing::debug!("Session {}: goodbye transmitted", id);
                            terminate.set();
                            break;
                        }
                    }
                    Err(FrameError::FrameTooLarge { size, max }) => {
                        // Refused before any bytes were written; keep going
                        tracing::warn!(
                            "Session {}: dropped oversized packet ({} bytes, max {})",
                            id,
                            size,
                            max
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Session {}: outbound error: {}", id, e);
                        terminate.set();
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("Session {}: outbound loop exited", id);
}
