//! Core types shared across the protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the conversation wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the counterparty
    Inbound,
    /// Written by the signed-in user
    Outbound,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

/// Public profile of a conversation counterparty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Summary of a conversation for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub counterparty_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<Profile>,
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

impl Conversation {
    /// Timestamp used to order conversation lists
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.created_at)
    }

    /// Best label for the counterparty
    pub fn title(&self) -> &str {
        self.counterparty
            .as_ref()
            .and_then(|p| p.display_name.as_deref())
            .unwrap_or(&self.counterparty_id)
    }
}
