//! Room directory
//!
//! Named room membership for room-scoped addressing. Rooms are created
//! implicitly on first join and removed when the last member leaves; there is
//! no separate create/destroy surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::server::RoomInfo;

/// Errors that can occur during room operations
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Not a member of room '{0}'")]
    NotAMember(String),

    #[error("Room membership limit reached ({0} rooms per connection)")]
    RoomLimit(usize),
}

/// Result type for room operations
pub type RoomResult<T> = Result<T, RoomError>;

/// Membership state, kept consistent in both directions under one lock
#[derive(Default)]
struct RoomState {
    /// Room name -> member ids
    rooms: HashMap<String, HashSet<Uuid>>,
    /// Connection id -> rooms it belongs to
    memberships: HashMap<Uuid, HashSet<String>>,
}

/// Directory of named rooms and their members
pub struct RoomDirectory {
    state: Arc<RwLock<RoomState>>,
    /// Maximum rooms a single connection may belong to
    max_rooms_per_connection: usize,
}

impl RoomDirectory {
    /// Create a directory with the given per-connection room cap
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(RoomState::default())),
            max_rooms_per_connection,
        }
    }

    /// Join a room, creating it if it does not exist
    ///
    /// Joining a room twice is idempotent. Returns the member ids after the
    /// join, including the joiner.
    pub async fn join(&self, id: Uuid, room: &str) -> RoomResult<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let RoomState { rooms, memberships } = &mut *state;

        let membership = memberships.entry(id).or_default();
        if !membership.contains(room) {
            if membership.len() >= self.max_rooms_per_connection {
                return Err(RoomError::RoomLimit(self.max_rooms_per_connection));
            }
            membership.insert(room.to_string());
            rooms.entry(room.to_string()).or_default().insert(id);
            debug!("Connection {} joined room '{}'", id, room);
        }

        Ok(rooms[room].iter().copied().collect())
    }

    /// Leave a room
    ///
    /// The room is removed entirely when its last member leaves.
    pub async fn leave(&self, id: Uuid, room: &str) -> RoomResult<()> {
        let mut state = self.state.write().await;

        let was_member = state
            .memberships
            .get_mut(&id)
            .map(|rooms| rooms.remove(room))
            .unwrap_or(false);
        if !was_member {
            return Err(RoomError::NotAMember(room.to_string()));
        }

        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                state.rooms.remove(room);
                debug!("Room '{}' removed (last member left)", room);
            }
        }

        debug!("Connection {} left room '{}'", id, room);
        Ok(())
    }

    /// Remove a connection from every room it belongs to
    ///
    /// Disconnect cleanup. Returns the names of the rooms that were left.
    /// Idempotent: an unknown id leaves nothing.
    pub async fn leave_all(&self, id: Uuid) -> Vec<String> {
        let mut state = self.state.write().await;

        let rooms = match state.memberships.remove(&id) {
            Some(rooms) => rooms,
            None => return Vec::new(),
        };

        let mut left = Vec::with_capacity(rooms.len());
        for room in rooms {
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
            left.push(room);
        }

        if !left.is_empty() {
            debug!("Connection {} removed from {} room(s)", id, left.len());
        }
        left
    }

    /// Member ids of a room (empty if the room does not exist)
    pub async fn members(&self, room: &str) -> Vec<Uuid> {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection belongs to
    pub async fn rooms_of(&self, id: Uuid) -> Vec<String> {
        let state = self.state.read().await;
        state
            .memberships
            .get(&id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a connection is a member of a room
    pub async fn is_member(&self, id: Uuid, room: &str) -> bool {
        let state = self.state.read().await;
        state
            .rooms
            .get(room)
            .map(|members| members.contains(&id))
            .unwrap_or(false)
    }

    /// List all rooms with member counts
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let state = self.state.read().await;
        state
            .rooms
            .iter()
            .map(|(room, members)| RoomInfo {
                room: room.clone(),
                members: members.len(),
            })
            .collect()
    }

    /// Number of rooms currently in existence
    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}
