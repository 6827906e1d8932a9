//! Admission and closure policy for rooms.
//!
//! The coordinator mirrors terminal closures in memory for fast-path
//! rejection and owns the per-room sequencing locks shared with the message
//! relay. Holding a room's lock across eviction guarantees that no message
//! can be queued for delivery once closure has begun, so `room.closed` is
//! always the last event a member sees.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::presence::PresenceRegistry;
use crate::protocol::ServerEvent;
use crate::store::{with_timeout, RoomStore, StoreError};
use crate::types::{RoomId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("room is closed")]
    RoomClosed,
    #[error("room not found")]
    RoomNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    #[error("only the room admin can close the room")]
    NotAdmin,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RoomCoordinator {
    rooms: Arc<dyn RoomStore>,
    presence: Arc<PresenceRegistry>,
    /// Terminally closed rooms. A room never leaves this set.
    closed: RwLock<HashSet<RoomId>>,
    /// Per-room sequencing locks; relay and closure for the same room are
    /// serialized through these, different rooms run fully in parallel.
    sequencers: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl RoomCoordinator {
    pub fn new(rooms: Arc<dyn RoomStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            rooms,
            presence,
            closed: RwLock::new(HashSet::new()),
            sequencers: Mutex::new(HashMap::new()),
        }
    }

    /// The sequencing lock for a room, created on first use. Terminally
    /// closed rooms get a throwaway lock instead so late senders cannot
    /// repopulate the map after closure evicted the entry.
    pub async fn sequencer(&self, room_id: &RoomId) -> Arc<Mutex<()>> {
        if self.closed.read().await.contains(room_id) {
            return Arc::new(Mutex::new(()));
        }
        let mut sequencers = self.sequencers.lock().await;
        sequencers
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub async fn sequencer_entries(&self) -> usize {
        self.sequencers.lock().await.len()
    }

    /// Whether a room currently accepts messages. Closure discovered via
    /// the store is cached as terminal.
    pub async fn is_open(&self, room_id: &RoomId) -> Result<bool, StoreError> {
        if self.closed.read().await.contains(room_id) {
            return Ok(false);
        }
        match with_timeout(self.rooms.get_active(room_id)).await? {
            Some(true) => Ok(true),
            Some(false) => {
                self.closed.write().await.insert(room_id.clone());
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Admission check run after authentication, before registration. A
    /// closed or unknown room rejects all new connections.
    pub async fn admit(&self, room_id: &RoomId) -> Result<(), AdmissionError> {
        if self.closed.read().await.contains(room_id) {
            return Err(AdmissionError::RoomClosed);
        }
        match with_timeout(self.rooms.get_active(room_id)).await? {
            Some(true) => Ok(()),
            Some(false) => {
                self.closed.write().await.insert(room_id.clone());
                Err(AdmissionError::RoomClosed)
            }
            None => Err(AdmissionError::RoomNotFound),
        }
    }

    /// Close a room for everyone. Idempotent: closing an already-closed
    /// room is a no-op success so an admin double-click never surfaces an
    /// error.
    ///
    /// Ordering is part of the contract: persist the closed state, then
    /// evict under the room's sequencing lock, then notify each evicted
    /// connection *before* dropping its transport.
    pub async fn close(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        is_admin: bool,
    ) -> Result<(), CloseError> {
        if !is_admin {
            return Err(CloseError::NotAdmin);
        }
        if self.closed.read().await.contains(room_id) {
            return Ok(());
        }

        with_timeout(self.rooms.set_active(room_id, false)).await?;

        // Grab the shared lock before the terminal mark so in-flight relays
        // holding it are still serialized against this eviction.
        let sequencer = self.sequencer(room_id).await;
        self.closed.write().await.insert(room_id.clone());
        let _guard = sequencer.lock().await;

        let evicted = self.presence.remove_room(room_id).await;
        tracing::info!(
            room = %room_id,
            by = %user_id,
            members = evicted.len(),
            "Room closed"
        );

        for (member_id, handle) in evicted {
            if !handle.push(ServerEvent::RoomClosed {
                room_id: room_id.clone(),
            }) {
                tracing::debug!(room = %room_id, user = %member_id, "Evicted connection already gone");
            }
            handle.shutdown();
        }

        // The closed set is the terminal record; the lock entry has no
        // further use and must not accumulate across room lifetimes.
        self.sequencers.lock().await.remove(room_id);
        Ok(())
    }
}
