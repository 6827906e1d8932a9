//! Wire-level events exchanged over a room connection.
//!
//! Event names are the stable contract surface; payload fields are
//! camelCase on the wire.

use crate::types::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "message.send")]
    MessageSend { content: String },
    /// Admin-only; payload is an empty object.
    #[serde(rename = "room.close")]
    RoomClose {},
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "user.joined", rename_all = "camelCase")]
    UserJoined { user_id: UserId },
    #[serde(rename = "user.left", rename_all = "camelCase")]
    UserLeft { user_id: UserId },
    #[serde(rename = "message.new", rename_all = "camelCase")]
    MessageNew {
        id: MessageId,
        content: String,
        user_id: UserId,
        display_name: String,
        timestamp: String,
    },
    #[serde(rename = "room.closed", rename_all = "camelCase")]
    RoomClosed { room_id: RoomId },
    #[serde(rename = "error")]
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_parses_wire_names() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"message.send","data":{"content":"hi"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::MessageSend {
                content: "hi".to_string()
            }
        );

        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"room.close","data":{}}"#).unwrap();
        assert_eq!(event, ClientEvent::RoomClose {});
    }

    #[test]
    fn test_server_event_uses_camel_case_payload() {
        let event = ServerEvent::MessageNew {
            id: "m1".to_string(),
            content: "hello".to_string(),
            user_id: "u1".to_string(),
            display_name: "Alice".to_string(),
            timestamp: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message.new");
        assert_eq!(json["data"]["userId"], "u1");
        assert_eq!(json["data"]["displayName"], "Alice");
        assert!(json["data"].get("user_id").is_none());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result =
            serde_json::from_str::<ClientEvent>(r#"{"event":"message.edit","data":{}}"#);
        assert!(result.is_err());
    }
}
