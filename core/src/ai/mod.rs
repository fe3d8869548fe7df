/// Room assistant: trigger policy, prompt assembly, reply generation
pub mod trigger;

pub use trigger::TriggerPolicy;

use crate::chat_types::{Author, Message, MessageKind};
use crate::error::Result;
use futures_util::future::{BoxFuture, FutureExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Mutex;

pub const ASSISTANT_AUTHOR_ID: &str = "ai-assistant";
pub const ASSISTANT_NAME: &str = "AI Assistant";

/// Messages of recent context included in a prompt
const CONTEXT_MESSAGES: usize = 5;

pub trait Assistant: Send + Sync {
    fn respond<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

pub fn assistant_author() -> Author {
    Author {
        id: ASSISTANT_AUTHOR_ID.to_string(),
        name: ASSISTANT_NAME.to_string(),
    }
}

/// Newest assistant message timestamp in an ordered view
pub fn last_reply_at(view: &[Message]) -> Option<chrono::DateTime<chrono::Utc>> {
    view.iter()
        .rev()
        .find(|m| m.kind == MessageKind::Assistant)
        .map(|m| m.created_at)
}

/// Prompt for one user message, with the tail of the room as context
pub fn build_prompt(room_id: &str, message: &str, view: &[Message]) -> String {
    let start = view.len().saturating_sub(CONTEXT_MESSAGES);
    let context = view[start..]
        .iter()
        .map(|m| format!("{}: {}", m.author_label(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a helpful assistant in the anonymous chat room \"{}\".\n\
         Keep replies friendly and under 150 words. Never ask for personal information.\n\n\
         Recent context:\n{}\n\nUser message: \"{}\"",
        room_id, context, message
    )
}

const CANNED_REPLIES: [&str; 5] = [
    "I'm having trouble processing that right now. Could you try rephrasing? 🤔",
    "That's interesting! Tell me more about your thoughts on this.",
    "I see what you mean. What's your perspective on this topic?",
    "Great point! I'd love to hear more about your experience with this.",
    "That's a fascinating topic! What got you interested in this?",
];

/// Offline assistant that picks from a fixed reply list
pub struct CannedAssistant {
    rng: Mutex<StdRng>,
}

impl CannedAssistant {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }
}

impl Assistant for CannedAssistant {
    fn respond<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        let reply = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            CANNED_REPLIES
                .choose(&mut *rng)
                .copied()
                .unwrap_or(CANNED_REPLIES[0])
                .to_string()
        };
        async move { Ok(reply) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_types::{MessageKey, ModerationLevel};
    use chrono::{Duration, Utc};

    fn message(id: &str, kind: MessageKind, secs: i64) -> Message {
        Message {
            key: MessageKey::remote(id),
            room_id: "lobby".to_string(),
            author_id: "u1".to_string(),
            author_name: "Calm Otter".to_string(),
            content: format!("text {}", id),
            kind,
            created_at: Utc::now() + Duration::seconds(secs),
            pending: false,
            moderation_level: ModerationLevel::Clean,
        }
    }

    #[test]
    fn test_last_reply_at() {
        let view = vec![
            message("a", MessageKind::Assistant, 0),
            message("b", MessageKind::User, 1),
            message("c", MessageKind::Assistant, 2),
            message("d", MessageKind::User, 3),
        ];
        assert_eq!(last_reply_at(&view), Some(view[2].created_at));
        assert_eq!(last_reply_at(&view[1..2]), None);
    }

    #[test]
    fn test_prompt_uses_recent_tail() {
        let view: Vec<Message> = (0..8)
            .map(|i| message(&i.to_string(), MessageKind::User, i))
            .collect();
        let prompt = build_prompt("lobby", "what now?", &view);

        assert!(prompt.contains("\"lobby\""));
        assert!(prompt.contains("text 7"));
        assert!(prompt.contains("text 3"));
        assert!(!prompt.contains("text 2"));
        assert!(prompt.ends_with("\"what now?\""));
    }

    #[tokio::test]
    async fn test_canned_assistant_replies() {
        let assistant = CannedAssistant::new(Some(1));
        let reply = assistant.respond("hi").await.unwrap();
        assert!(CANNED_REPLIES.contains(&reply.as_str()));
    }
}
