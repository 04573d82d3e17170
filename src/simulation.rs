//! Simulated-livestream stage events
//!
//! The livestream view is populated by synthetic viewer interactions -
//! chat messages, gifts, greetings - generated outside this core. They
//! enter the conversation through the window synchronization facade,
//! bypassing the recognition-analysis orchestrator entirely.

use crate::conversation::ConversationMessage;
use serde::{Deserialize, Serialize};

/// A viewer interaction kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StageEventKind {
    /// Chat message scrolling over the stream
    Danmaku {
        persona: String,
        nickname: String,
        message: String,
    },
    /// Virtual gift
    Gift {
        persona: String,
        nickname: String,
        gift_name: String,
        count: u32,
    },
    /// A viewer greeting the streamer on entry
    Greeting {
        persona: String,
        nickname: String,
        message: String,
    },
}

/// One simulated viewer interaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub event_type: StageEventKind,
    /// Event time in Unix seconds
    pub timestamp: u64,
}

impl StageEvent {
    pub fn new(event_type: StageEventKind) -> Self {
        Self {
            event_type,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    /// Short kind tag for bus payloads
    pub fn kind_name(&self) -> &'static str {
        match self.event_type {
            StageEventKind::Danmaku { .. } => "danmaku",
            StageEventKind::Gift { .. } => "gift",
            StageEventKind::Greeting { .. } => "greeting",
        }
    }

    /// Render the event as an ordinary conversation message
    ///
    /// The message carries the viewer role and persona tag but is otherwise
    /// indistinguishable from an AI reply in the conversation feed.
    pub fn to_message(&self) -> ConversationMessage {
        match &self.event_type {
            StageEventKind::Danmaku {
                persona, message, ..
            } => ConversationMessage::viewer(persona.clone(), message.clone()),
            StageEventKind::Gift {
                persona,
                nickname,
                gift_name,
                count,
            } => ConversationMessage::viewer(
                persona.clone(),
                format!("{} sent {} x {}", nickname, gift_name, count),
            ),
            StageEventKind::Greeting {
                persona, message, ..
            } => ConversationMessage::viewer(persona.clone(), message.clone()),
        }
    }
}

/// Map a frequency level to an event interval range in seconds
pub fn frequency_to_interval(frequency: &str) -> (u64, u64) {
    match frequency {
        "high" => (4, 8),
        "medium" => (10, 20),
        "low" => (25, 60),
        _ => (10, 20),
    }
}

/// Map a gift frequency level to (min count, max count, min combo, max combo)
pub fn gift_frequency_to_params(frequency: &str) -> (u32, u32, u32, u32) {
    match frequency {
        "high" => (10, 20, 3, 5),
        "medium" => (2, 5, 1, 3),
        "low" => (1, 1, 1, 1),
        _ => (2, 5, 1, 3),
    }
}
