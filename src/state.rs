//! Shared application state wiring the coordinator core to its
//! collaborators.

use std::sync::Arc;

use crate::auth::AuthConfig;
use crate::presence::PresenceRegistry;
use crate::relay::MessageRelay;
use crate::rooms::RoomCoordinator;
use crate::store::{
    InMemoryMessageStore, InMemoryRoomStore, InMemoryUserStore, MessageStore, RoomStore, UserStore,
};

pub struct AppState {
    pub auth: AuthConfig,
    pub rooms: Arc<dyn RoomStore>,
    pub users: Arc<dyn UserStore>,
    pub presence: Arc<PresenceRegistry>,
    pub coordinator: Arc<RoomCoordinator>,
    pub relay: MessageRelay,
}

impl AppState {
    /// State backed by the in-memory stores; rooms are ephemeral, so this
    /// is what the binary runs with.
    pub fn new(auth: AuthConfig) -> Self {
        Self::with_stores(
            auth,
            Arc::new(InMemoryRoomStore::new()),
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryMessageStore::new()),
        )
    }

    pub fn with_stores(
        auth: AuthConfig,
        rooms: Arc<dyn RoomStore>,
        users: Arc<dyn UserStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let coordinator = Arc::new(RoomCoordinator::new(rooms.clone(), presence.clone()));
        let relay = MessageRelay::new(
            coordinator.clone(),
            presence.clone(),
            messages,
            users.clone(),
        );
        Self {
            auth,
            rooms,
            users,
            presence,
            coordinator,
            relay,
        }
    }
}
