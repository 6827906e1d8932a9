use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type UserId = String;
pub type MessageId = String;

/// Process-local identifier for a live connection. Used by the presence
/// registry to tell a stale handle apart from its replacement.
pub type ConnId = u64;

/// Verified `{user, room, admin}` tuple derived from a connection's
/// credential. Produced once per connection and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub access_code: String,
    pub admin_id: UserId,
    /// `false` is terminal: a closed room never reopens.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub room_id: Option<RoomId>,
    pub display_name: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// A chat message with server-assigned identity and timestamp, immutable
/// once the message store has persisted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
