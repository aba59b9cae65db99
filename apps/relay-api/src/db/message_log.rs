//! Durable append-only chat log.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use parking_lot::Mutex;

use crate::db::pool::DbPool;
use crate::db::schema::chat_messages;
use crate::db::StoreError;
use crate::models::message::{ChatMessage, NewChatMessage};

/// Append-only store of chat messages.
///
/// Implementations must tolerate concurrent calls from many sessions; the
/// gateway performs no locking of its own around them.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Persist one message and return the stored record.
    async fn append(&self, message: NewChatMessage<'_>) -> Result<ChatMessage, StoreError>;
    /// Every stored message in insertion order.
    ///
    /// Insertion order is message id order. Ids are snowflakes taken when the
    /// relay accepts a frame, so two appends racing to commit still list in
    /// the order they were accepted, on every backend.
    async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError>;
    /// Remove every message. Returns how many were removed.
    async fn clear_all(&self) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgMessageLog {
    pool: DbPool,
}

impl PgMessageLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for PgMessageLog {
    async fn append(&self, message: NewChatMessage<'_>) -> Result<ChatMessage, StoreError> {
        let mut conn = self.pool.get().await?;
        let stored = diesel::insert_into(chat_messages::table)
            .values(&message)
            .returning(ChatMessage::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.pool.get().await?;
        let rows = chat_messages::table
            .order(chat_messages::id.asc())
            .select(ChatMessage::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        let mut conn = self.pool.get().await?;
        let removed = diesel::delete(chat_messages::table).execute(&mut conn).await?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (no DATABASE_URL / tests)
// ---------------------------------------------------------------------------

pub struct MemoryMessageLog {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn append(&self, message: NewChatMessage<'_>) -> Result<ChatMessage, StoreError> {
        let stored = message.to_message();
        let mut messages = self.messages.lock();
        let at = messages.partition_point(|m| m.id < stored.id);
        messages.insert(at, stored.clone());
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.messages.lock().clone())
    }

    async fn clear_all(&self) -> Result<usize, StoreError> {
        let mut messages = self.messages.lock();
        let removed = messages.len();
        messages.clear();
        Ok(removed)
    }
}
