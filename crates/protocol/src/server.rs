//! Server → Client realtime events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payload of a pushed chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub has_read: bool,
}

/// Events pushed from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(NewMessage),
}

/// Subscription key for [`ServerEvent`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    NewMessage,
}

/// Why an inbound frame was rejected
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unparseable frame: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

impl ServerEvent {
    /// Parse and validate a text frame.
    ///
    /// Unknown event names and payloads with empty identifiers are rejected so
    /// nothing downstream has to re-check them.
    pub fn decode(frame: &str) -> Result<Self, EventError> {
        let event: ServerEvent = serde_json::from_str(frame)?;
        event.validate()?;
        Ok(event)
    }

    pub fn kind(&self) -> ServerEventKind {
        match self {
            ServerEvent::NewMessage(_) => ServerEventKind::NewMessage,
        }
    }

    fn validate(&self) -> Result<(), EventError> {
        match self {
            ServerEvent::NewMessage(msg) => {
                if msg.id.trim().is_empty() {
                    return Err(EventError::MissingField("id"));
                }
                if msg.from_user_id.trim().is_empty() {
                    return Err(EventError::MissingField("fromUserId"));
                }
                if msg.to_user_id.trim().is_empty() {
                    return Err(EventError::MissingField("toUserId"));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_message_frame() {
        let json = r#"{
          "event":"newMessage",
          "data":{
            "id":"m-1",
            "fromUserId":"alice",
            "toUserId":"bob",
            "message":"hi",
            "createdAt":"2024-01-15T10:00:00.000Z",
            "hasRead":false
          }
        }"#;

        let event = ServerEvent::decode(json).expect("decode new_message");
        assert_eq!(event.kind(), ServerEventKind::NewMessage);
        match event {
            ServerEvent::NewMessage(msg) => {
                assert_eq!(msg.id, "m-1");
                assert_eq!(msg.from_user_id, "alice");
                assert_eq!(msg.to_user_id, "bob");
                assert_eq!(msg.message, "hi");
                assert_eq!(msg.created_at.to_rfc3339(), "2024-01-15T10:00:00+00:00");
                assert!(!msg.has_read);
            }
        }
    }

    #[test]
    fn has_read_defaults_to_false() {
        let json = r#"{"event":"newMessage","data":{"id":"m-2","fromUserId":"a","toUserId":"b","message":"x","createdAt":"2024-01-15T10:00:00Z"}}"#;
        match ServerEvent::decode(json).expect("decode") {
            ServerEvent::NewMessage(msg) => assert!(!msg.has_read),
        }
    }

    #[test]
    fn rejects_unknown_event_name() {
        let json = r#"{"event":"typing","data":{"fromUserId":"a"}}"#;
        assert!(matches!(
            ServerEvent::decode(json),
            Err(EventError::Parse(_))
        ));
    }

    #[test]
    fn rejects_payload_missing_fields() {
        let json = r#"{"event":"newMessage","data":{"id":"m-3","fromUserId":"a","message":"x"}}"#;
        assert!(matches!(
            ServerEvent::decode(json),
            Err(EventError::Parse(_))
        ));
    }

    #[test]
    fn rejects_blank_identifiers() {
        let json = r#"{"event":"newMessage","data":{"id":" ","fromUserId":"a","toUserId":"b","message":"x","createdAt":"2024-01-15T10:00:00Z"}}"#;
        assert!(matches!(
            ServerEvent::decode(json),
            Err(EventError::MissingField("id"))
        ));
    }
}
