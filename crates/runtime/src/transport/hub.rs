//! Room-based connection hub.
//!
//! The hub is the in-memory fanout layer between the single server loop and
//! whatever transport carries the connections. Delivery is best-effort and
//! at-most-once: a closed or slow connection drops messages, and the
//! persisted log covers anything a viewer misses.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::message::{Outbound, Room};

/// Opaque identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Peer {
    room: Room,
    sender: mpsc::UnboundedSender<Outbound>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    peers: HashMap<ConnectionId, Peer>,
}

/// Registry of live connections, grouped by room.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a room; the returned receiver yields its
    /// outbound messages.
    pub fn register(&self, room: Room) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.peers.insert(id, Peer { room, sender });
        tracing::debug!("registered {id} in room {room:?}");
        (id, receiver)
    }

    pub fn unregister(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if inner.peers.remove(&id).is_some() {
            tracing::debug!("unregistered {id}");
        }
    }

    pub fn room_of(&self, id: ConnectionId) -> Option<Room> {
        let inner = self.inner.lock().expect("hub lock poisoned");
        inner.peers.get(&id).map(|peer| peer.room)
    }

    /// Send to one connection. Best-effort: a closed channel is logged at
    /// debug level and the message dropped.
    pub fn send(&self, id: ConnectionId, message: impl Into<Outbound>) {
        let inner = self.inner.lock().expect("hub lock poisoned");
        match inner.peers.get(&id) {
            Some(peer) => {
                if peer.sender.send(message.into()).is_err() {
                    tracing::debug!("{id} outbound channel closed");
                }
            }
            None => tracing::debug!("{id} not registered"),
        }
    }

    /// Broadcast to every connection in a room.
    pub fn broadcast(&self, room: Room, message: impl Into<Outbound>) {
        let message = message.into();
        let inner = self.inner.lock().expect("hub lock poisoned");
        for (id, peer) in &inner.peers {
            if peer.room == room && peer.sender.send(message.clone()).is_err() {
                tracing::debug!("{id} outbound channel closed");
            }
        }
    }
}
