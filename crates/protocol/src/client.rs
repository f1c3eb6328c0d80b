//! Client → Server realtime events

use serde::{Deserialize, Serialize};

/// Events emitted by the client over the realtime channel.
///
/// Frames are `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Announce sent right after the socket opens
    #[serde(rename_all = "camelCase")]
    Join {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    /// Deliver a chat message to another user
    #[serde(rename_all = "camelCase")]
    SendMessage { to_user_id: String, message: String },
}

impl ClientEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::SendMessage { .. } => "sendMessage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientEvent;

    #[test]
    fn send_message_uses_camel_case_wire_shape() {
        let event = ClientEvent::SendMessage {
            to_user_id: "user-7".to_string(),
            message: "hello".to_string(),
        };

        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "event": "sendMessage",
                "data": {"toUserId": "user-7", "message": "hello"}
            })
        );
        assert_eq!(event.name(), "sendMessage");
    }

    #[test]
    fn join_without_user_omits_the_field() {
        let json = serde_json::to_string(&ClientEvent::Join { user_id: None }).expect("serialize");
        assert_eq!(json, r#"{"event":"join","data":{}}"#);
    }
}
