//! Events fanned out to connected clients and their wire rendering.

use crate::models::message::ChatMessage;

/// Something every live connection should see.
///
/// Announcements (`Joined`/`Left`) are synthetic: they never touch the
/// message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEvent<'a> {
    Message { username: &'a str, text: &'a str },
    Joined { username: &'a str },
    Left { username: &'a str },
}

impl ChatEvent<'_> {
    /// Text frame payload sent to clients.
    pub fn render(&self) -> String {
        match self {
            Self::Message { username, text } => format!("💬 {username}: {text}"),
            Self::Joined { username } => format!("👋 {username} joined"),
            Self::Left { username } => format!("👋 {username} left"),
        }
    }

    pub fn is_announcement(&self) -> bool {
        !matches!(self, Self::Message { .. })
    }
}

impl<'a> From<&'a ChatMessage> for ChatEvent<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self::Message {
            username: &message.username,
            text: &message.message,
        }
    }
}
