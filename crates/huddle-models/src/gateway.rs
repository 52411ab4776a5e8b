use serde::{Deserialize, Serialize};

use crate::group::SenderRole;
use crate::message::Message;
use crate::user::UserProfile;

// Client -> Server events
pub const EVENT_JOIN_GROUP: &str = "join-group";
pub const EVENT_SEND_MESSAGE: &str = "send-message";

// Server -> Client events
pub const EVENT_READY: &str = "ready";
pub const EVENT_RECEIVED_MESSAGE: &str = "received-message";
pub const EVENT_JOINED_GROUP: &str = "joined-group";
pub const EVENT_ERROR: &str = "error";

/// Frames are JSON text of the form `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinGroup(#[serde(with = "crate::id")] i64),
    SendMessage(SendMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinGroup(_) => EVENT_JOIN_GROUP,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessage {
    pub content: String,
    #[serde(with = "crate::id")]
    pub receiver_id: i64,
    #[serde(rename = "isGroup", default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Ready(Ready),
    ReceivedMessage(ReceivedMessage),
    JoinedGroup(JoinedGroup),
    Error(GatewayError),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => EVENT_READY,
            Self::ReceivedMessage(_) => EVENT_RECEIVED_MESSAGE,
            Self::JoinedGroup(_) => EVENT_JOINED_GROUP,
            Self::Error(_) => EVENT_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ready {
    pub user: UserProfile,
    pub rooms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message: Message,
    pub username: String,
    pub email: String,
    #[serde(rename = "senderRole", skip_serializing_if = "Option::is_none", default)]
    pub sender_role: Option<SenderRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedGroup {
    #[serde(rename = "groupId", with = "crate::id")]
    pub group_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub event: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_client_frames() {
        let join: ClientEvent =
            serde_json::from_str(r#"{"event":"join-group","data":"42"}"#).unwrap();
        assert!(matches!(join, ClientEvent::JoinGroup(42)));
        let join: ClientEvent = serde_json::from_str(r#"{"event":"join-group","data":42}"#).unwrap();
        assert!(matches!(join, ClientEvent::JoinGroup(42)));

        let send: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"content":"hi","receiver_id":7,"isGroup":true}}"#,
        )
        .unwrap();
        match send {
            ClientEvent::SendMessage(payload) => {
                assert_eq!(payload.receiver_id, 7);
                assert!(payload.is_group);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let bad = serde_json::from_str::<ClientEvent>(
            r#"{"event":"send-message","data":{"content":"hi","receiver_id":"seven"}}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn error_frame_names_the_rejected_event() {
        let event = ServerEvent::Error(GatewayError {
            event: Some(EVENT_SEND_MESSAGE.to_string()),
            message: "nope".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
        assert_eq!(event.name(), EVENT_ERROR);
        assert_eq!(value["data"]["message"], "nope");
    }
}
