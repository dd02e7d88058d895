//! Conversation store — the dialogue log and the accumulated research log.
//!
//! The dialogue holds user/assistant turns the planner model sees. The
//! accumulated log is a superset that also keeps process notes, keyword
//! generator output and search summaries; only report synthesis reads it.

use crate::types::{Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationStore {
    history: Vec<Message>,
    accumulated: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dialogue turn in both logs.
    ///
    /// Returns false, storing nothing, when the content is empty.
    pub fn record_turn(&mut self, role: Role, content: impl Into<String>) -> bool {
        let Some(message) = Self::non_empty(role, content.into()) else {
            return false;
        };
        debug!(role = %role, preview = %preview(&message.content), "Recorded turn");
        self.history.push(message.clone());
        self.accumulated.push(message);
        true
    }

    /// Record an internal note in the accumulated log only.
    ///
    /// Returns false, storing nothing, when the content is empty.
    pub fn record_note(&mut self, role: Role, content: impl Into<String>) -> bool {
        let Some(message) = Self::non_empty(role, content.into()) else {
            return false;
        };
        debug!(role = %role, preview = %preview(&message.content), "Recorded note");
        self.accumulated.push(message);
        true
    }

    fn non_empty(role: Role, content: String) -> Option<Message> {
        if content.trim().is_empty() {
            warn!(role = %role, "Refusing to store a message with empty content");
            return None;
        }
        Some(Message::new(role, content))
    }

    /// Every stored turn, including system entries, in order.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// User and assistant turns only, as sent to the planner model.
    pub fn dialogue(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().filter(|m| m.is_dialogue())
    }

    /// The full accumulated log used for report synthesis.
    pub fn accumulated(&self) -> &[Message] {
        &self.accumulated
    }

    /// The first thing the user asked in this session.
    pub fn first_user_input(&self) -> Option<&str> {
        self.history
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.accumulated.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.accumulated.clear();
    }
}

/// First 100 characters of a message, for logs.
fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
