//! Conversation message vocabulary
//!
//! The shared shape of everything that lands in the conversation view:
//! AI replies, diagnostic messages, and synthetic viewer interactions
//! injected by the simulated-livestream mode.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a conversation message is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The player (recognized speech)
    User,
    /// The AI companion (analysis replies and diagnostics)
    Assistant,
    /// A simulated livestream viewer (stage events)
    Viewer,
}

/// A single message in the conversation feed
///
/// Stage-event messages carry a `persona` tag so the UI can render them with
/// the viewer's character, but they are otherwise indistinguishable from AI
/// replies - both flow through the same topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    /// Unique message id
    pub id: Uuid,
    /// Message attribution
    pub role: Role,
    /// Persona tag for synthetic viewer messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Message body
    pub content: String,
    /// Creation time in Unix milliseconds
    pub timestamp_millis: i64,
}

impl ConversationMessage {
    fn new(role: Role, persona: Option<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            persona,
            content: content.into(),
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// An AI companion reply (or diagnostic) message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, None, content)
    }

    /// A recognized player utterance
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, None, content)
    }

    /// A synthetic viewer message tagged with its persona
    pub fn viewer(persona: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Viewer, Some(persona.into()), content)
    }
}
