//! In-memory source of truth for which connections are in which room.
//!
//! This is the only shared mutable structure in the real-time core. All
//! access goes through the narrow operation set below; fan-out callers get
//! a point-in-time snapshot so a concurrent join/leave can never corrupt an
//! iteration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

use crate::protocol::ServerEvent;
use crate::types::{ConnId, RoomId, UserId};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// What travels down a connection's outbound channel: either a wire event
/// or an instruction to tear the transport down.
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Shutdown,
}

/// The addressing half of a live connection. Cloneable; the registry holds
/// one clone per `(room, user)` entry. The channel is ordered, so a
/// [`ServerEvent`] pushed before [`ConnectionHandle::shutdown`] is
/// delivered before the transport dies.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: ConnId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle with a fresh connection id plus the receiving end
    /// that the connection task pumps to its socket.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Push an event to this connection. Returns false if the connection
    /// task is already gone; callers treat that as a skipped delivery.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    /// Ask the connection task to close its transport.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Outbound::Shutdown);
    }
}

/// `room -> user -> handle`, at most one entry per `(room, user)`.
#[derive(Default)]
pub struct PresenceRegistry {
    rooms: RwLock<HashMap<RoomId, HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `(room, user)`. Returns the
    /// displaced handle if one existed; the caller is expected to shut the
    /// stale connection down so the user never receives double deliveries.
    pub async fn register(
        &self,
        room_id: RoomId,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_default().insert(user_id, handle)
    }

    /// Remove the entry for `(room, user)` only if the stored handle is
    /// still `handle`. Returns whether removal occurred; a late deregister
    /// from a superseded connection must not evict its replacement.
    pub async fn deregister(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        handle: &ConnectionHandle,
    ) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let matches = members
            .get(user_id)
            .is_some_and(|current| current.conn_id == handle.conn_id);
        if matches {
            members.remove(user_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
        }
        matches
    }

    /// Point-in-time snapshot of a room's members, ordered by user id for
    /// deterministic fan-out.
    pub async fn members_of(&self, room_id: &RoomId) -> Vec<(UserId, ConnectionHandle)> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<(UserId, ConnectionHandle)> = match rooms.get(room_id) {
            Some(m) => m.iter().map(|(u, h)| (u.clone(), h.clone())).collect(),
            None => Vec::new(),
        };
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    /// Evict every entry for a room, returning the removed handles so the
    /// caller can notify and force-disconnect them.
    pub async fn remove_room(&self, room_id: &RoomId) -> Vec<(UserId, ConnectionHandle)> {
        let mut rooms = self.rooms.write().await;
        rooms
            .remove(room_id)
            .map(|m| m.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn is_present(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.rooms
            .read()
            .await
            .get(room_id)
            .is_some_and(|m| m.contains_key(user_id))
    }

    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map_or(0, |m| m.len())
    }
}
