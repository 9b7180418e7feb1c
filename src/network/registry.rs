//! Session bookkeeping
//!
//! The server keeps every live session behind one async-guarded map so the
//! accept loop and the tick loop can share it. Terminated sessions are not
//! removed eagerly; the tick loop sweeps them out before each broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use super::session::{SessionError, SessionHandle, SessionId};
use crate::protocol::Packet;

/// Shared map of live sessions plus the id counter
#[derive(Debug)]
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            // Id 0 belongs to the client's own session handle
            next_id: AtomicU32::new(1),
        }
    }

    /// Next session id, never reused within a server's lifetime
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn insert(&self, handle: SessionHandle) {
        self.sessions.write().await.insert(handle.id(), handle);
    }

    /// Remove every terminated session, returning the removed handles
    pub async fn sweep(&self) -> Vec<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let dead: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, handle)| handle.is_terminated())
            .map(|(id, _)| *id)
            .collect();
        dead.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    /// Queue a copy of `packet` on every live session
    ///
    /// A session whose queue is full misses this packet; the next broadcast
    /// carries fresher state anyway. Returns how many sessions accepted it.
    pub async fn broadcast(&self, packet: &Packet) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for handle in sessions.values() {
            match handle.enqueue(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(SessionError::QueueFull) => {
                    tracing::debug!("Session {} queue full, skipping broadcast", handle.id());
                }
                Err(e) => {
                    tracing::debug!("Session {} refused broadcast: {}", handle.id(), e);
                }
            }
        }
        delivered
    }

    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
