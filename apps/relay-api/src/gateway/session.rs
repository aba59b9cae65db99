//! Per-connection session lifecycle: `Connecting → Active → Closing → Closed`.
//!
//! A [`Session`] owns the decision of when its connection enters and leaves
//! the registry. It is transport-agnostic: frames go out through the
//! connection's outbox and inbound text is handed to
//! [`Session::handle_text`], so the whole lifecycle runs without a socket.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use relay_common::SnowflakeGenerator;
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::tokens::TokenError;
use crate::db::message_log::MessageLog;
use crate::db::StoreError;
use crate::models::message::NewChatMessage;
use crate::AppState;

use super::events::ChatEvent;
use super::fanout::{BroadcastReport, Broadcaster};
use super::registry::{Connection, ConnectionRegistry, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Bad, expired or missing token. The session never becomes active.
    #[error("authentication failed: {0}")]
    Authentication(#[from] TokenError),
    /// The message log rejected an append. The message is dropped.
    #[error("message not persisted: {0}")]
    Persistence(#[from] StoreError),
    /// The owning connection's socket failed.
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("session is {0:?}")]
    NotActive(SessionState),
}

pub struct Session {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    log: Arc<dyn MessageLog>,
    snowflake: Arc<SnowflakeGenerator>,
    store_timeout: Duration,
    state: Mutex<SessionState>,
}

impl Session {
    /// Verify `token` and, on success, admit the connection and announce it.
    ///
    /// The connection is registered before the join announcement goes out,
    /// so the new client receives its own join notice. On failure nothing is
    /// registered and nothing is broadcast.
    pub fn connect(
        state: &AppState,
        token: &str,
        outbox: mpsc::Sender<Outbound>,
    ) -> Result<Self, SessionError> {
        let username = state.tokens.verify(token)?;

        let session = Self {
            connection: Arc::new(Connection::new(username, outbox)),
            registry: state.registry.clone(),
            broadcaster: state.broadcaster.clone(),
            log: state.log.clone(),
            snowflake: state.snowflake.clone(),
            store_timeout: state.config.store_timeout,
            state: Mutex::new(SessionState::Connecting),
        };
        session.activate();

        Ok(session)
    }

    fn activate(&self) {
        self.registry.add(self.connection.clone());
        *self.state.lock() = SessionState::Active;

        let report = self.broadcaster.broadcast_to_all(&ChatEvent::Joined {
            username: self.username(),
        });

        tracing::info!(
            connection_id = %self.id(),
            username = %self.username(),
            delivered = report.delivered,
            "gateway session established"
        );
    }

    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn username(&self) -> &str {
        self.connection.username()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Persist one inbound text frame, then broadcast it.
    ///
    /// Nothing is broadcast unless the append succeeded. A persistence
    /// failure, including an append that outlives the store timeout, is
    /// returned to the caller but leaves the session active.
    pub async fn handle_text(&self, text: &str) -> Result<BroadcastReport, SessionError> {
        let state = self.state();
        if state != SessionState::Active {
            return Err(SessionError::NotActive(state));
        }

        let message = NewChatMessage {
            id: self.snowflake.generate(),
            username: self.username(),
            message: text,
            created_at: Utc::now(),
        };
        let stored = time::timeout(self.store_timeout, self.log.append(message))
            .await
            .map_err(|_| StoreError::Unavailable("append timed out".to_string()))??;

        Ok(self.broadcaster.broadcast_to_all(&ChatEvent::from(&stored)))
    }

    /// Resolves when a broadcast has evicted this session's connection.
    pub async fn evicted(&self) {
        self.connection.evicted().await
    }

    /// Ask the writer to close the socket with `code`. Best effort.
    pub fn request_close(&self, code: u16, reason: &'static str) -> bool {
        self.connection.request_close(code, reason)
    }

    /// Deregister and announce the leave. Runs at most once: later calls
    /// (and the drop guard) return `false` without side effects.
    pub fn teardown(&self) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Closing | SessionState::Closed => return false,
                SessionState::Connecting => {
                    *state = SessionState::Closed;
                    return false;
                }
                SessionState::Active => *state = SessionState::Closing,
            }
        }

        // Already gone if a broadcast evicted it first.
        let was_registered = self.registry.remove(self.id()).is_some();

        let report = self.broadcaster.broadcast_to_all(&ChatEvent::Left {
            username: self.username(),
        });

        *self.state.lock() = SessionState::Closed;

        tracing::info!(
            connection_id = %self.id(),
            username = %self.username(),
            was_registered,
            evicted = self.connection.is_evicted(),
            delivered = report.delivered,
            "gateway session ended"
        );

        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::message_log::MemoryMessageLog;
    use crate::db::users::MemoryUserStore;
    use crate::models::message::ChatMessage;
    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::watch;

    struct FailingLog;

    #[async_trait]
    impl MessageLog for FailingLog {
        async fn append(&self, _message: NewChatMessage<'_>) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }

        async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }

        async fn clear_all(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    struct StalledLog;

    #[async_trait]
    impl MessageLog for StalledLog {
        async fn append(&self, _message: NewChatMessage<'_>) -> Result<ChatMessage, StoreError> {
            std::future::pending().await
        }

        async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }

        async fn clear_all(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn state_with_log(log: Arc<dyn MessageLog>) -> AppState {
        let (_tx, rx) = watch::channel(false);
        let mut config = Config::new("session-test-secret");
        config.store_timeout = std::time::Duration::from_millis(50);
        AppState::new(
            config,
            Arc::new(MemoryUserStore::new()),
            log,
            rx,
        )
    }

    fn test_state() -> (AppState, Arc<MemoryMessageLog>) {
        let log = Arc::new(MemoryMessageLog::new());
        (state_with_log(log.clone()), log)
    }

    fn join(state: &AppState, username: &str) -> (Session, mpsc::Receiver<Outbound>) {
        let token = state.tokens.issue(username).unwrap();
        let (tx, rx) = mpsc::channel(16);
        let session = Session::connect(state, &token, tx).expect("valid token");
        (session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Outbound::Text(text) = frame {
                out.push(text.to_string());
            }
        }
        out
    }

    #[tokio::test]
    async fn new_connection_sees_its_own_join() {
        let (state, _log) = test_state();
        let (session, mut rx) = join(&state, "alice");

        assert_eq!(session.state(), SessionState::Active);
        assert!(state.registry.contains(session.id()));
        assert_eq!(drain(&mut rx), vec!["👋 alice joined"]);
    }

    #[tokio::test]
    async fn invalid_or_expired_token_has_no_side_effects() {
        let (state, _log) = test_state();
        let (_bob, mut bob_rx) = join(&state, "bob");
        drain(&mut bob_rx);

        let expired = state
            .tokens
            .issue_with_ttl("alice", Duration::minutes(-10))
            .unwrap();
        for token in [expired.as_str(), "garbage", ""] {
            let (tx, _rx) = mpsc::channel(16);
            let err = Session::connect(&state, token, tx).err().expect("must fail");
            assert!(matches!(err, SessionError::Authentication(_)));
        }

        assert_eq!(state.registry.len(), 1);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn two_clients_chat_then_one_fails() {
        let (state, log) = test_state();

        let (alice, mut alice_rx) = join(&state, "alice");
        assert_eq!(drain(&mut alice_rx), vec!["👋 alice joined"]);

        let (bob, mut bob_rx) = join(&state, "bob");
        assert_eq!(state.registry.len(), 2);
        assert_eq!(drain(&mut alice_rx), vec!["👋 bob joined"]);
        assert_eq!(drain(&mut bob_rx), vec!["👋 bob joined"]);

        let report = alice.handle_text("hi").await.unwrap();
        assert_eq!(report.delivered, 2);
        let stored = log.list_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].username, "alice");
        assert_eq!(stored[0].message, "hi");
        assert_eq!(drain(&mut alice_rx), vec!["💬 alice: hi"]);
        assert_eq!(drain(&mut bob_rx), vec!["💬 alice: hi"]);

        // Bob's transport goes away; the next broadcast evicts him.
        drop(bob_rx);
        let report = alice.handle_text("still there?").await.unwrap();
        assert_eq!(report.evicted, vec![bob.id().to_string()]);
        assert_eq!(state.registry.len(), 1);
        assert!(bob.connection().is_evicted());

        assert!(bob.teardown());
        assert_eq!(
            drain(&mut alice_rx),
            vec!["💬 alice: still there?", "👋 bob left"]
        );
    }

    #[tokio::test]
    async fn failed_append_is_never_broadcast() {
        let state = state_with_log(Arc::new(FailingLog));
        let (alice, mut alice_rx) = join(&state, "alice");
        let (_bob, mut bob_rx) = join(&state, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let err = alice.handle_text("lost").await.unwrap_err();
        assert!(matches!(err, SessionError::Persistence(_)));
        assert_eq!(alice.state(), SessionState::Active);
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn stalled_append_times_out_without_broadcast() {
        let state = state_with_log(Arc::new(StalledLog));
        let (alice, mut alice_rx) = join(&state, "alice");
        drain(&mut alice_rx);

        let err = tokio::time::timeout(std::time::Duration::from_secs(2), alice.handle_text("hi"))
            .await
            .expect("append must not block past the store timeout")
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Persistence(StoreError::Unavailable(_))
        ));
        assert_eq!(alice.state(), SessionState::Active);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn teardown_runs_exactly_once() {
        let (state, _log) = test_state();
        let (alice, mut alice_rx) = join(&state, "alice");
        let (bob, _bob_rx) = join(&state, "bob");
        drain(&mut alice_rx);

        assert!(bob.teardown());
        assert!(!bob.teardown());
        assert_eq!(bob.state(), SessionState::Closed);
        drop(bob);

        assert_eq!(drain(&mut alice_rx), vec!["👋 bob left"]);
        assert_eq!(state.registry.len(), 1);
        assert!(state.registry.contains(alice.id()));
    }

    #[tokio::test]
    async fn dropping_an_active_session_tears_it_down() {
        let (state, _log) = test_state();
        let (_alice, mut alice_rx) = join(&state, "alice");
        let (bob, _bob_rx) = join(&state, "bob");
        drain(&mut alice_rx);

        drop(bob);

        assert_eq!(drain(&mut alice_rx), vec!["👋 bob left"]);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn closed_session_rejects_text() {
        let (state, log) = test_state();
        let (alice, _rx) = join(&state, "alice");
        alice.teardown();

        let err = alice.handle_text("late").await.unwrap_err();
        assert!(matches!(err, SessionError::NotActive(SessionState::Closed)));
        assert!(log.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backlogged_session_is_notified_of_eviction() {
        let (state, _log) = test_state();
        let token = state.tokens.issue("slow").unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let slow = Session::connect(&state, &token, tx).unwrap();

        // The join notice filled the single slot.
        let (_alice, _alice_rx) = join(&state, "alice");

        tokio::time::timeout(std::time::Duration::from_secs(1), slow.evicted())
            .await
            .expect("slow session should be evicted");
        assert!(!state.registry.contains(slow.id()));
    }
}
