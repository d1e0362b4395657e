use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

/// Where a session's generation cycle currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingResponse,
    Streaming,
    Failed,
}

impl SessionPhase {
    /// A generation owns the session and new sends must be rejected.
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionPhase::AwaitingResponse | SessionPhase::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_viewed_at: Option<DateTime<Utc>>,
    /// Set while the opening user message still awaits its first reply.
    /// Persisted so a restart can resume the auto-trigger.
    #[serde(default)]
    pub pending_first_response: bool,
}

impl ChatSession {
    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Exactly one user message and nothing from the assistant yet.
    pub fn awaits_first_response(&self) -> bool {
        self.messages.len() == 1 && self.messages[0].is_user
    }
}
