//! Registry of live gateway connections.
//!
//! The registry is the only mutable state shared between sessions. Readers
//! never iterate the live map: broadcasts work from a [`Snapshot`] copied
//! under a short read lock, so membership changes during a fan-out cannot
//! corrupt it.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use relay_common::id::{prefix, prefixed_ulid};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

pub type ConnectionId = String;

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Close { code: u16, reason: &'static str },
}

/// Why a frame could not be handed to a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("recipient outbox is closed")]
    Closed,
    #[error("recipient outbox is full")]
    Backlogged,
}

/// One live client stream, bound to the username it authenticated as.
pub struct Connection {
    id: ConnectionId,
    username: String,
    outbox: mpsc::Sender<Outbound>,
    evicted: AtomicBool,
    eviction: Notify,
}

impl Connection {
    pub fn new(username: impl Into<String>, outbox: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: prefixed_ulid(prefix::CONNECTION),
            username: username.into(),
            outbox,
            evicted: AtomicBool::new(false),
            eviction: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Queue a text frame without waiting. Never blocks the caller.
    pub fn deliver(&self, payload: Arc<str>) -> Result<(), DeliveryFailure> {
        self.outbox
            .try_send(Outbound::Text(payload))
            .map_err(|err| match err {
                TrySendError::Full(_) => DeliveryFailure::Backlogged,
                TrySendError::Closed(_) => DeliveryFailure::Closed,
            })
    }

    /// Ask the writer to send a close frame and stop. Best effort: returns
    /// `false` if the outbox cannot take it.
    pub fn request_close(&self, code: u16, reason: &'static str) -> bool {
        self.outbox.try_send(Outbound::Close { code, reason }).is_ok()
    }

    /// Record that a broadcast evicted this connection and wake its session.
    pub fn mark_evicted(&self) {
        if !self.evicted.swap(true, Ordering::AcqRel) {
            self.eviction.notify_one();
        }
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Resolves once [`mark_evicted`](Self::mark_evicted) has been called.
    pub async fn evicted(&self) {
        if self.is_evicted() {
            return;
        }
        self.eviction.notified().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("evicted", &self.is_evicted())
            .finish()
    }
}

/// Point-in-time copy of registry membership.
#[derive(Debug, Clone)]
pub struct Snapshot {
    connections: Arc<[Arc<Connection>]>,
}

impl Snapshot {
    pub fn ids(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.id()).collect()
    }
}

impl Deref for Snapshot {
    type Target = [Arc<Connection>];

    fn deref(&self) -> &Self::Target {
        &self.connections
    }
}

/// Thread-safe set of live connections keyed by connection id.
///
/// A username may hold several connections at once; membership is per
/// connection handle.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a connection. Adding an already-present connection is a no-op;
    /// returns whether it was newly inserted.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(connection.id()) {
            return false;
        }
        connections.insert(connection.id.clone(), connection);
        true
    }

    /// Remove a connection if present. Absent ids are not an error since
    /// eviction and teardown may race to remove the same connection.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.write().remove(id)
    }

    pub fn snapshot(&self) -> Snapshot {
        let connections: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        Snapshot {
            connections: connections.into(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
