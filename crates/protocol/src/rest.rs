//! REST request/response bodies.
//! These map directly to JSON bodies on the wire (camelCase).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::NewMessage;
use crate::types::{Conversation, Direction, Message, Profile};

// ── Auth ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<UserDto>,
}

/// Body returned by the renewal endpoint. Servers that do not rotate refresh
/// tokens omit `refreshToken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl From<UserDto> for Profile {
    fn from(user: UserDto) -> Self {
        Profile {
            id: user.id,
            display_name: user.name,
            avatar_url: user.avatar_url,
        }
    }
}

// ── Chats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_read: bool,
}

impl MessageDto {
    /// Convert to the viewer-relative model.
    pub fn into_message(self, viewer_id: &str, conversation_id: &str) -> Message {
        let direction = if self.from_user_id == viewer_id {
            Direction::Outbound
        } else {
            Direction::Inbound
        };
        Message {
            id: self.id,
            conversation_id: conversation_id.to_string(),
            direction,
            text: self.message,
            created_at: self.created_at,
            read: self.has_read,
        }
    }
}

impl From<NewMessage> for MessageDto {
    fn from(msg: NewMessage) -> Self {
        MessageDto {
            id: msg.id,
            from_user_id: msg.from_user_id,
            to_user_id: msg.to_user_id,
            message: msg.message,
            created_at: msg.created_at,
            has_read: msg.has_read,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: String,
    pub counterparty_id: String,
    #[serde(default)]
    pub counterparty: Option<UserDto>,
    #[serde(default)]
    pub last_message: Option<MessageDto>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ConversationDto {
    pub fn into_conversation(self, viewer_id: &str) -> Conversation {
        let last_message = self
            .last_message
            .map(|m| m.into_message(viewer_id, &self.id));
        Conversation {
            id: self.id,
            counterparty_id: self.counterparty_id,
            counterparty: self.counterparty.map(Profile::from),
            last_message,
            unread_count: self.unread_count,
        }
    }
}

// ── Common ───────────────────────────────────────────────────────────────────

/// Error body returned by the backend. Either field may be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_text(self) -> Option<String> {
        self.message.or(self.error)
    }
}
