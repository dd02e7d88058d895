//! Core type definitions for Delve.
//!
//! Defines the messages exchanged with the completion gateway and the
//! request/outcome pair of a single gateway invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Whether this message is part of the user-visible dialogue.
    pub fn is_dialogue(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant)
    }
}

/// A request to the completion gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Allow the gateway to resolve web search through tool use.
    pub enable_search: bool,
}

/// What a successful gateway invocation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// Final text content.
    Content(String),
    /// An unresolved tool call the gateway handed back instead of content.
    ToolInvocation {
        name: String,
        arguments: serde_json::Value,
    },
}

impl CompletionOutcome {
    /// Create a content outcome.
    pub fn content(text: impl Into<String>) -> Self {
        CompletionOutcome::Content(text.into())
    }

    /// Create a tool invocation outcome.
    pub fn tool_invocation(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        CompletionOutcome::ToolInvocation {
            name: name.into(),
            arguments,
        }
    }

    /// Returns the text if this is a content outcome.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CompletionOutcome::Content(text) => Some(text),
            CompletionOutcome::ToolInvocation { .. } => None,
        }
    }
}
