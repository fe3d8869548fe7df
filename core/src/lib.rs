/// Anonymous group chat core
///
/// Optimistic room views reconciled against an append-only message stream,
/// a connection state machine, and escalating content moderation.

pub mod error;
pub mod config;
pub mod chat_types;
pub mod connection;
pub mod identity;
pub mod store;
pub mod sync;
pub mod moderation;
pub mod ai;
pub mod client;

pub use error::{ChatError, Result};
pub use config::Config;
pub use chat_types::{Message, MessageKey, MessageKind, ModerationLevel, RoomEvent};
pub use client::{ChatClient, PendingSend};
pub use connection::{ConnectionMachine, ConnectionState};
pub use store::{LocalStore, MessageStore};
