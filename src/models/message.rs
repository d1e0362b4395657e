use serde::{Deserialize, Serialize};

use super::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat bubble.
///
/// Assistant messages start as an empty placeholder with `is_streaming` set,
/// grow while the reveal runs, and are finalized by clearing the flag. A
/// failed generation leaves `failed` set and the text untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub failed: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: ids::new_message_id(),
            text: text.into(),
            is_user: true,
            is_streaming: false,
            failed: false,
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: ids::new_message_id(),
            text: String::new(),
            is_user: false,
            is_streaming: true,
            failed: false,
        }
    }

    pub fn role(&self) -> Role {
        if self.is_user {
            Role::User
        } else {
            Role::Assistant
        }
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
        self.is_streaming = false;
    }
}
