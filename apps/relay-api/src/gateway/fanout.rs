//! Broadcast engine: fans one event out to every connection in a snapshot.
//!
//! Delivery is a non-blocking hand-off into each recipient's bounded outbox,
//! so a stalled client can never hold up the others. A recipient whose
//! outbox is full or closed is evicted from the registry once the whole pass
//! has completed.

use std::sync::Arc;

use super::events::ChatEvent;
use super::registry::{ConnectionId, ConnectionRegistry, Snapshot};

/// Outcome of one broadcast pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Cloneable handle to the broadcast engine. Store in AppState.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every connection in `snapshot`.
    ///
    /// Failures are never returned to the caller; they only evict the
    /// failing recipient.
    pub fn broadcast(&self, event: &ChatEvent<'_>, snapshot: &Snapshot) -> BroadcastReport {
        let payload: Arc<str> = event.render().into();
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for connection in snapshot.iter() {
            match connection.deliver(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        username = %connection.username(),
                        %err,
                        "delivery failed"
                    );
                    failed.push(connection.clone());
                }
            }
        }

        for connection in failed {
            self.registry.remove(connection.id());
            connection.mark_evicted();
            report.evicted.push(connection.id().to_string());
        }

        if !report.evicted.is_empty() {
            tracing::info!(
                delivered = report.delivered,
                evicted = report.evicted.len(),
                announcement = event.is_announcement(),
                "evicted unreachable connections"
            );
        } else {
            tracing::debug!(
                delivered = report.delivered,
                announcement = event.is_announcement(),
                "broadcast complete"
            );
        }

        report
    }

    /// Broadcast to a fresh snapshot of the registry.
    pub fn broadcast_to_all(&self, event: &ChatEvent<'_>) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        self.broadcast(event, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::{Connection, Outbound};
    use tokio::sync::mpsc;

    fn attach(
        registry: &ConnectionRegistry,
        username: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(username, tx));
        registry.add(conn.clone());
        (conn, rx)
    }

    fn next_text(rx: &mut mpsc::Receiver<Outbound>) -> Option<String> {
        match rx.try_recv().ok()? {
            Outbound::Text(text) => Some(text.to_string()),
            Outbound::Close { .. } => None,
        }
    }

    #[test]
    fn failed_recipients_are_evicted_and_others_still_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());

        let (_a, mut ra) = attach(&registry, "alice", 8);
        let (b, rb) = attach(&registry, "bob", 8);
        let (_c, mut rc) = attach(&registry, "carol", 8);
        let (d, rd) = attach(&registry, "dave", 8);
        drop(rb);
        drop(rd);

        let event = ChatEvent::Message {
            username: "alice",
            text: "hi",
        };
        let report = broadcaster.broadcast_to_all(&event);

        assert_eq!(report.delivered, 2);
        let mut evicted = report.evicted.clone();
        evicted.sort();
        let mut expected = vec![b.id().to_string(), d.id().to_string()];
        expected.sort();
        assert_eq!(evicted, expected);

        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(b.id()));
        assert!(b.is_evicted() && d.is_evicted());
        assert_eq!(next_text(&mut ra).as_deref(), Some("💬 alice: hi"));
        assert_eq!(next_text(&mut rc).as_deref(), Some("💬 alice: hi"));
    }

    #[test]
    fn backlogged_recipient_is_evicted() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (slow, _rx) = attach(&registry, "slow", 1);

        let first = broadcaster.broadcast_to_all(&ChatEvent::Joined { username: "slow" });
        assert_eq!(first.delivered, 1);

        let second = broadcaster.broadcast_to_all(&ChatEvent::Left { username: "x" });
        assert_eq!(second.delivered, 0);
        assert_eq!(second.evicted, vec![slow.id().to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_uses_the_given_snapshot() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let (_a, mut ra) = attach(&registry, "alice", 8);

        let snapshot = registry.snapshot();
        let (_b, mut rb) = attach(&registry, "bob", 8);

        let report = broadcaster.broadcast(&ChatEvent::Joined { username: "alice" }, &snapshot);
        assert_eq!(report.delivered, 1);
        assert_eq!(next_text(&mut ra).as_deref(), Some("👋 alice joined"));
        assert_eq!(next_text(&mut rb), None);
    }

    #[test]
    fn empty_snapshot_is_a_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry);
        let report = broadcaster.broadcast_to_all(&ChatEvent::Joined { username: "ghost" });
        assert_eq!(report, BroadcastReport::default());
    }
}
