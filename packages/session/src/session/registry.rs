//! Joined-room bookkeeping and join replay.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{
    domain::{Room, RoomId},
    infrastructure::dto::{ClientEvent, RoomPayload},
};

use super::connection::TransportConnection;

/// Rooms the client considers joined.
///
/// Joins are optimistic: a room is recorded immediately and the server is
/// told when a link is up, either right away or on the next link replay.
pub struct RoomRegistry {
    connection: TransportConnection,
    rooms: Mutex<BTreeMap<RoomId, Room>>,
}

impl RoomRegistry {
    /// Create a registry and install it as the connection's replay source
    pub fn new(connection: TransportConnection) -> Arc<Self> {
        let registry = Arc::new(Self {
            connection: connection.clone(),
            rooms: Mutex::new(BTreeMap::new()),
        });
        let weak: Weak<Self> = Arc::downgrade(&registry);
        connection.set_replay_hook(move || {
            weak.upgrade()
                .map(|registry| registry.replay_events())
                .unwrap_or_default()
        });
        registry
    }

    /// Mark `room` joined. Returns `false` (and sends nothing) if it already was.
    pub fn join(&self, mut room: Room) -> bool {
        let room_id = room.id.clone();
        {
            let mut rooms = self.lock();
            if rooms.contains_key(&room_id) {
                tracing::debug!(room = %room_id, "already joined");
                return false;
            }
            room.joined = true;
            rooms.insert(room_id.clone(), room);
        }
        if self.connection.send(join_event(&room_id)) {
            tracing::info!(room = %room_id, "joined room");
        } else {
            tracing::info!(room = %room_id, "joined room, server notified on next link");
        }
        true
    }

    /// Forget `room_id`. Returns `false` if it was not joined.
    pub fn leave(&self, room_id: &RoomId) -> bool {
        if self.lock().remove(room_id).is_none() {
            return false;
        }
        let notified = self.connection.send(ClientEvent::LeaveRoom(RoomPayload {
            room_id: room_id.clone(),
        }));
        tracing::info!(room = %room_id, notified, "left room");
        true
    }

    /// Re-emit a join for every joined room over the current link.
    /// Returns how many joins were handed to the connection.
    pub fn rejoin_all(&self) -> usize {
        self.replay_events()
            .into_iter()
            .filter(|event| self.connection.send(event.clone()))
            .count()
    }

    /// Join frames for every joined room, in room id order
    pub fn replay_events(&self) -> Vec<ClientEvent> {
        self.lock().keys().map(join_event).collect()
    }

    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.lock().contains_key(room_id)
    }

    pub fn room(&self, room_id: &RoomId) -> Option<Room> {
        self.lock().get(room_id).cloned()
    }

    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.lock().keys().cloned().collect()
    }

    /// Drop every room without telling the server, returning the ids dropped
    pub fn clear(&self) -> Vec<RoomId> {
        let rooms = std::mem::take(&mut *self.lock());
        rooms.into_keys().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RoomId, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn join_event(room_id: &RoomId) -> ClientEvent {
    ClientEvent::JoinRoom(RoomPayload {
        room_id: room_id.clone(),
    })
}
