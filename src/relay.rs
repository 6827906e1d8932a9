//! Turns one inbound send into a durably stored message and a room-wide
//! broadcast.
//!
//! Check, persist, and broadcast all happen under the room's sequencing
//! lock, so members of one room see messages in the order the relay
//! accepted them. Different rooms proceed fully in parallel.

use std::sync::Arc;

use crate::presence::PresenceRegistry;
use crate::protocol::ServerEvent;
use crate::rooms::RoomCoordinator;
use crate::store::{with_timeout, MessageStore, StoreError, UserStore};
use crate::types::{RoomId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("message content is empty")]
    Empty,
    #[error("room is closed")]
    RoomClosed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MessageRelay {
    coordinator: Arc<RoomCoordinator>,
    presence: Arc<PresenceRegistry>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserStore>,
}

impl MessageRelay {
    pub fn new(
        coordinator: Arc<RoomCoordinator>,
        presence: Arc<PresenceRegistry>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            coordinator,
            presence,
            messages,
            users,
        }
    }

    /// Persist and fan out one message. The sender receives the broadcast
    /// too: there is no local echo, the server's copy is what "sent" means.
    pub async fn relay(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        content: &str,
    ) -> Result<(), RelayError> {
        // Rejected before any store contact
        if content.trim().is_empty() {
            return Err(RelayError::Empty);
        }

        let sequencer = self.coordinator.sequencer(room_id).await;
        let _guard = sequencer.lock().await;

        // Re-checked at send time: a room can close mid-session
        if !self.coordinator.is_open(room_id).await? {
            return Err(RelayError::RoomClosed);
        }

        let message = with_timeout(self.messages.persist(room_id, user_id, content)).await?;
        let display_name = with_timeout(self.users.get_display_name(user_id)).await?;

        let event = ServerEvent::MessageNew {
            id: message.id,
            content: message.content,
            user_id: message.user_id,
            display_name,
            timestamp: message.timestamp.to_rfc3339(),
        };

        for (member_id, handle) in self.presence.members_of(room_id).await {
            if !handle.push(event.clone()) {
                tracing::debug!(room = %room_id, user = %member_id, "Skipping delivery to closed connection");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{ConnectionHandle, Outbound};
    use crate::store::{InMemoryMessageStore, InMemoryRoomStore, InMemoryUserStore, RoomStore};
    use tokio::sync::mpsc;

    struct Fixture {
        relay: MessageRelay,
        coordinator: Arc<RoomCoordinator>,
        presence: Arc<PresenceRegistry>,
        messages: Arc<InMemoryMessageStore>,
        users: Arc<InMemoryUserStore>,
        room_id: RoomId,
    }

    async fn fixture() -> Fixture {
        let rooms = Arc::new(InMemoryRoomStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let room = rooms.create_room("test", &"admin".to_string()).await.unwrap();
        let presence = Arc::new(PresenceRegistry::new());
        let coordinator = Arc::new(RoomCoordinator::new(rooms, presence.clone()));
        let relay = MessageRelay::new(
            coordinator.clone(),
            presence.clone(),
            messages.clone(),
            users.clone(),
        );
        Fixture {
            relay,
            coordinator,
            presence,
            messages,
            users,
            room_id: room.id,
        }
    }

    async fn member(
        f: &Fixture,
        name: &str,
    ) -> (UserId, mpsc::UnboundedReceiver<Outbound>) {
        let user = f.users.create_user(name, Some(&f.room_id), false).await.unwrap();
        let (handle, rx) = ConnectionHandle::channel();
        f.presence
            .register(f.room_id.clone(), user.id.clone(), handle)
            .await;
        (user.id, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> ServerEvent {
        match rx.try_recv().unwrap() {
            Outbound::Event(ev) => ev,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_whitespace_only_content_rejected_without_store_contact() {
        let f = fixture().await;
        let (alice, mut rx) = member(&f, "Alice").await;

        let result = f.relay.relay(&f.room_id, &alice, "   ").await;
        assert!(matches!(result, Err(RelayError::Empty)));
        assert_eq!(f.messages.len().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delivered_to_all_members_including_sender() {
        let f = fixture().await;
        let (alice, mut alice_rx) = member(&f, "Alice").await;
        let (_bob, mut bob_rx) = member(&f, "Bob").await;

        f.relay.relay(&f.room_id, &alice, "hi").await.unwrap();

        let to_alice = next_event(&mut alice_rx);
        let to_bob = next_event(&mut bob_rx);
        // Identical canonical message to everyone, sender included
        assert_eq!(to_alice, to_bob);
        match to_alice {
            ServerEvent::MessageNew {
                content,
                user_id,
                display_name,
                ..
            } => {
                assert_eq!(content, "hi");
                assert_eq!(user_id, alice);
                assert_eq!(display_name, "Alice");
            }
            other => panic!("expected message.new, got {:?}", other),
        }
        assert_eq!(f.messages.len().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_closed_room_rejected() {
        let f = fixture().await;
        let (alice, mut rx) = member(&f, "Alice").await;

        f.coordinator
            .close(&f.room_id, &"admin".to_string(), true)
            .await
            .unwrap();
        // Eviction drained the room; the rejected send stores nothing
        let result = f.relay.relay(&f.room_id, &alice, "too late").await;
        assert!(matches!(result, Err(RelayError::RoomClosed)));
        assert_eq!(f.messages.len().await, 0);

        // The member saw closure, not the message
        assert!(matches!(
            next_event(&mut rx),
            ServerEvent::RoomClosed { .. }
        ));
    }

    #[tokio::test]
    async fn test_per_room_order_preserved() {
        let f = fixture().await;
        let (alice, mut rx) = member(&f, "Alice").await;

        f.relay.relay(&f.room_id, &alice, "first").await.unwrap();
        f.relay.relay(&f.room_id, &alice, "second").await.unwrap();

        let first = next_event(&mut rx);
        let second = next_event(&mut rx);
        match (first, second) {
            (
                ServerEvent::MessageNew { content: c1, .. },
                ServerEvent::MessageNew { content: c2, .. },
            ) => {
                assert_eq!(c1, "first");
                assert_eq!(c2, "second");
            }
            other => panic!("expected two message.new events, got {:?}", other),
        }
    }
}
