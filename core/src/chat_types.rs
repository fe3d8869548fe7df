/// Shared types for the chat core: messages, store records, room events
use crate::connection::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum message length in characters
pub const MAX_CONTENT_LEN: usize = 500;

/// Where a message identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Temporary id minted locally for an optimistic entry
    Local,
    /// Id assigned by the remote store
    Remote,
}

/// Two-field message key so local and store ids can never collide
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub origin: Origin,
    pub id: String,
}

impl MessageKey {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            origin: Origin::Local,
            id: id.into(),
        }
    }

    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            origin: Origin::Remote,
            id: id.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Origin::Local => write!(f, "local:{}", self.id),
            Origin::Remote => write!(f, "{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    System,
    Assistant,
}

/// Moderation classification attached at send time, never recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationLevel {
    #[default]
    Clean,
    Mild,
    Severe,
}

/// Author fields denormalized onto every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
}

/// One entry of the ordered room view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageKey,
    pub room_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    /// True only for unconfirmed optimistic entries
    pub pending: bool,
    pub moderation_level: ModerationLevel,
}

impl Message {
    /// Build a confirmed message from a store record
    pub fn from_record(record: &MessageRecord) -> Self {
        Self {
            key: MessageKey::remote(record.id.clone()),
            room_id: record.room_id.clone(),
            author_id: record.author_id.clone(),
            author_name: record.author_name.clone(),
            content: record.content.clone(),
            kind: record.kind,
            created_at: record.created_at,
            pending: false,
            moderation_level: record.moderation_level,
        }
    }

    /// Label shown next to the message body
    pub fn author_label(&self) -> &str {
        match self.kind {
            MessageKind::User => &self.author_name,
            MessageKind::Assistant => "AI Assistant",
            MessageKind::System => "system",
        }
    }
}

/// Record as delivered by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub moderation_level: ModerationLevel,
}

/// Record handed to `append`; the store stamps id and created_at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageWrite {
    pub room_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub moderation_level: ModerationLevel,
}

/// Real-time events broadcast by the chat client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Connection state machine moved
    ConnectionChanged { state: ConnectionState },
    /// The ordered view was rebuilt or patched
    ViewUpdated { room_id: String, len: usize },
    /// A message went out with one redacted term
    Warning { message: String, warning_count: u32 },
    /// A message was held back by moderation
    Blocked { message: String, warning_count: u32 },
    /// The session is banned and was forced out of the room
    AutoBanned { room_id: String },
    /// An append failed; the optimistic entry was rolled back
    SendFailed {
        temp_id: String,
        restored_text: String,
        reason: String,
    },
    /// Stream delivery failed; the last good view is kept
    StreamError { room_id: String, reason: String },
}
