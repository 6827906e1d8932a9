//! External collaborator contracts (room, user, and message stores) plus
//! the in-memory implementations that back the binary and the tests.
//!
//! The traits are the seam where a relational backend would plug in; the
//! coordinator core only ever talks to these contracts.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::types::{ChatMessage, Room, RoomId, User, UserId};

/// Upper bound on any single store call made from a connection path. A call
/// that exceeds this rejects the triggering operation instead of leaving a
/// half-initialized connection.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store call timed out")]
    Timeout,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Run a store call under [`STORE_TIMEOUT`], folding the elapsed case into
/// the store's own error type.
pub async fn with_timeout<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(STORE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, name: &str, admin_id: &UserId) -> Result<Room, StoreError>;
    /// Look up an *active* room by its access code.
    async fn find_by_access_code(&self, code: &str) -> Result<Option<Room>, StoreError>;
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError>;
    /// `None` means the room does not exist.
    async fn get_active(&self, room_id: &RoomId) -> Result<Option<bool>, StoreError>;
    async fn set_active(&self, room_id: &RoomId, active: bool) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `room_id` is `None` for an admin created before their room exists.
    async fn create_user(
        &self,
        display_name: &str,
        room_id: Option<&RoomId>,
        is_admin: bool,
    ) -> Result<User, StoreError>;
    async fn update_room_id(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), StoreError>;
    async fn get_display_name(&self, user_id: &UserId) -> Result<String, StoreError>;
    async fn users_in_room(&self, room_id: &RoomId) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its canonical id and timestamp.
    async fn persist(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;
}

/// Safe character set for access codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

fn generate_access_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

#[derive(Default)]
pub struct InMemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, Room>>,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for InMemoryRoomStore {
    async fn create_room(&self, name: &str, admin_id: &UserId) -> Result<Room, StoreError> {
        let mut rooms = self.rooms.write().await;

        // Regenerate on collision (rare with ~7e8 combinations)
        let access_code = loop {
            let code = generate_access_code();
            if !rooms.values().any(|r| r.access_code == code) {
                break code;
            }
        };

        let room = Room {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            access_code,
            admin_id: admin_id.clone(),
            active: true,
            created_at: Utc::now(),
        };
        rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_access_code(&self, code: &str) -> Result<Option<Room>, StoreError> {
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .find(|r| r.active && r.access_code == code)
            .cloned())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.read().await.get(room_id).cloned())
    }

    async fn get_active(&self, room_id: &RoomId) -> Result<Option<bool>, StoreError> {
        Ok(self.rooms.read().await.get(room_id).map(|r| r.active))
    }

    async fn set_active(&self, room_id: &RoomId, active: bool) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or(StoreError::NotFound)?;
        room.active = active;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(
        &self,
        display_name: &str,
        room_id: Option<&RoomId>,
        is_admin: bool,
    ) -> Result<User, StoreError> {
        let user = User {
            id: ulid::Ulid::new().to_string(),
            room_id: room_id.cloned(),
            display_name: display_name.to_string(),
            is_admin,
            joined_at: Utc::now(),
        };
        self.users
            .write()
            .await
            .insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_room_id(&self, user_id: &UserId, room_id: &RoomId) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(user_id).ok_or(StoreError::NotFound)?;
        user.room_id = Some(room_id.clone());
        Ok(())
    }

    async fn get_display_name(&self, user_id: &UserId) -> Result<String, StoreError> {
        self.users
            .read()
            .await
            .get(user_id)
            .map(|u| u.display_name.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn users_in_room(&self, room_id: &RoomId) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.room_id.as_ref() == Some(room_id))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(users)
    }
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages persisted so far (test observability).
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn persist(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let message = ChatMessage {
            id: ulid::Ulid::new().to_string(),
            room_id: room_id.clone(),
            user_id: user_id.clone(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }
}
