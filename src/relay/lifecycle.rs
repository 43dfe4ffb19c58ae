//! Session lifecycle manager
//!
//! Handles connect/disconnect events, registry mutation, and cleanup. All
//! registry writes flow through here so that join/leave notifications and
//! room cleanup stay consistent with the registry's contents.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::registry::{ConnectionHandle, ConnectionRegistry, RegistryError};
use super::rooms::{RoomDirectory, RoomError};
use crate::server::{ErrorCode, ServerMessage};

/// Errors that can occur during session lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Server full ({0} connections)")]
    ServerFull(usize),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Coordinates connection lifecycles
///
/// Owns the connect/disconnect/rename/room-membership transitions and emits
/// the corresponding notifications to other connections.
pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
    /// Maximum simultaneous connections
    max_connections: usize,
}

impl SessionManager {
    /// Create a session manager over the given registry and room directory
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomDirectory>,
        max_connections: usize,
    ) -> Self {
        Self {
            registry,
            rooms,
            max_connections,
        }
    }

    /// Register a new connection
    ///
    /// Allocates an id, registers the outbound queue, and announces the
    /// arrival to every other connection. Fails with `ServerFull` when the
    /// connection limit is reached.
    pub async fn connect(
        &self,
        remote_addr: SocketAddr,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> LifecycleResult<Uuid> {
        if self.registry.count().await >= self.max_connections {
            warn!("Connection from {} refused: server full", remote_addr);
            return Err(LifecycleError::ServerFull(self.max_connections));
        }

        let id = Uuid::new_v4();
        self.registry
            .register(ConnectionHandle::new(id, remote_addr, sender))
            .await;

        info!("Session {} connected from {}", id, remote_addr);
        self.notify_others(id, ServerMessage::peer_joined(id, None))
            .await;

        Ok(id)
    }

    /// Deregister a connection and clean up its room memberships
    ///
    /// Idempotent: disconnecting an unknown or already-disconnected id is a
    /// no-op.
    pub async fn disconnect(&self, id: Uuid) {
        let handle = match self.registry.deregister(id).await {
            Some(handle) => handle,
            None => return,
        };

        let left = self.rooms.leave_all(id).await;
        info!(
            "Session {} from {} disconnected after {:?} (left {} room(s))",
            id,
            handle.remote_addr(),
            handle.uptime(),
            left.len()
        );

        self.notify_others(id, ServerMessage::peer_left(id)).await;
    }

    /// Change a connection's display name and announce it
    pub async fn rename(&self, id: Uuid, name: &str) -> LifecycleResult<()> {
        self.registry.set_name(id, name).await?;
        info!("Session {} renamed to '{}'", id, name);

        self.notify_others(
            id,
            ServerMessage::NameChanged {
                connection_id: id,
                name: name.to_string(),
            },
        )
        .await;

        Ok(())
    }

    /// Join a room on behalf of a connection
    ///
    /// Returns the member ids after the join, including the joiner.
    pub async fn join_room(&self, id: Uuid, room: &str) -> LifecycleResult<Vec<Uuid>> {
        if !self.registry.contains(id).await {
            return Err(RegistryError::PeerNotFound(id).into());
        }
        Ok(self.rooms.join(id, room).await?)
    }

    /// Leave a room on behalf of a connection
    pub async fn leave_room(&self, id: Uuid, room: &str) -> LifecycleResult<()> {
        Ok(self.rooms.leave(id, room).await?)
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.registry.count().await
    }

    /// Queue a notification for every connection except the subject
    ///
    /// Connections with a closed outbound queue are reaped on the spot.
    async fn notify_others(&self, exclude: Uuid, message: ServerMessage) {
        for (id, sender) in self.registry.senders_except(exclude).await {
            if sender.send(message.clone()).is_err() {
                warn!("Outbound queue closed for {}, reaping connection", id);
                self.registry.deregister(id).await;
                self.rooms.leave_all(id).await;
            }
        }
    }
}

impl From<LifecycleError> for ServerMessage {
    fn from(err: LifecycleError) -> Self {
        let code = match &err {
            LifecycleError::ServerFull(_) => ErrorCode::ServerFull,
            LifecycleError::Registry(_) => ErrorCode::PeerNotFound,
            LifecycleError::Room(RoomError::NotAMember(_)) => ErrorCode::NotAMember,
            LifecycleError::Room(RoomError::RoomLimit(_)) => ErrorCode::RoomLimit,
        };
        ServerMessage::error_with_code(err.to_string(), code)
    }
}
