use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::db::schema::chat_messages;

/// A persisted chat message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize)]
#[diesel(table_name = chat_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ChatMessage {
    pub id: i64,
    pub username: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chat_messages)]
pub struct NewChatMessage<'a> {
    pub id: i64,
    pub username: &'a str,
    pub message: &'a str,
    pub created_at: DateTime<Utc>,
}

impl NewChatMessage<'_> {
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            username: self.username.to_string(),
            message: self.message.to_string(),
            created_at: self.created_at,
        }
    }
}
