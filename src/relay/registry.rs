//! Connection registry
//!
//! Tracks live connections and their identifiers. Each connection owns an
//! outbound message queue; the registry holds the sending half so the router
//! and lifecycle manager can deliver to any connection by id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::server::{PeerInfo, ServerMessage};

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Peer not found: {0}")]
    PeerNotFound(Uuid),

    #[error("Outbound channel closed for peer {0}")]
    ChannelClosed(Uuid),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Handle to a single live connection
///
/// Holds the sending half of the connection's outbound queue plus metadata.
/// The socket task owns the receiving half and drains it into the WebSocket
/// sink.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Connection id assigned at accept time
    id: Uuid,
    /// Display name, if the client has set one
    name: Option<String>,
    /// Remote socket address
    remote_addr: SocketAddr,
    /// When the connection was registered
    connected_at: Instant,
    /// Outbound message queue
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle for a freshly accepted connection
    pub fn new(id: Uuid, remote_addr: SocketAddr, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            name: None,
            remote_addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Get the connection id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Time since the connection was registered
    pub fn uptime(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    /// Queue a message for this connection
    pub fn send(&self, message: ServerMessage) -> RegistryResult<()> {
        self.sender
            .send(message)
            .map_err(|_| RegistryError::ChannelClosed(self.id))
    }

    /// Wire-level peer info for listings
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            connection_id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Registry of all live connections
///
/// Thread-safe map from connection id to handle. All mutation goes through
/// the session lifecycle manager; the router only reads and sends.
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection handle
    pub async fn register(&self, handle: ConnectionHandle) {
        let id = handle.id();
        let mut connections = self.connections.write().await;
        connections.insert(id, handle);
        debug!("Registered connection {} ({} live)", id, connections.len());
    }

    /// Remove a connection, returning its handle if it was registered
    pub async fn deregister(&self, id: Uuid) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        let handle = connections.remove(&id);
        if handle.is_some() {
            debug!("Deregistered connection {} ({} live)", id, connections.len());
        }
        handle
    }

    /// Queue a message for one connection
    pub async fn send_to(&self, id: Uuid, message: ServerMessage) -> RegistryResult<()> {
        let connections = self.connections.read().await;
        let handle = connections.get(&id).ok_or(RegistryError::PeerNotFound(id))?;
        handle.send(message)
    }

    /// Set the display name of a connection, returning the previous name
    pub async fn set_name(&self, id: Uuid, name: impl Into<String>) -> RegistryResult<Option<String>> {
        let mut connections = self.connections.write().await;
        let handle = connections
            .get_mut(&id)
            .ok_or(RegistryError::PeerNotFound(id))?;
        Ok(handle.name.replace(name.into()))
    }

    /// Get the display name of a connection
    pub async fn name_of(&self, id: Uuid) -> RegistryResult<Option<String>> {
        let connections = self.connections.read().await;
        let handle = connections.get(&id).ok_or(RegistryError::PeerNotFound(id))?;
        Ok(handle.name.clone())
    }

    /// List all live connections
    pub async fn list_peers(&self) -> Vec<PeerInfo> {
        let connections = self.connections.read().await;
        connections.values().map(ConnectionHandle::info).collect()
    }

    /// Clone the outbound senders of every connection except one
    ///
    /// Used by the router for fan-out; cloning the senders keeps the read
    /// lock window short.
    pub async fn senders_except(&self, exclude: Uuid) -> Vec<(Uuid, mpsc::UnboundedSender<ServerMessage>)> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|h| h.id() != exclude)
            .map(|h| (h.id(), h.sender.clone()))
            .collect()
    }

    /// Clone the outbound senders of a specific set of connections
    pub async fn senders_of(&self, ids: &[Uuid]) -> Vec<(Uuid, mpsc::UnboundedSender<ServerMessage>)> {
        let connections = self.connections.read().await;
        ids.iter()
            .filter_map(|id| connections.get(id).map(|h| (h.id(), h.sender.clone())))
            .collect()
    }

    /// Number of live connections
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Check whether a connection is registered
    pub async fn contains(&self, id: Uuid) -> bool {
        self.connections.read().await.contains_key(&id)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn new_handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(Uuid::new_v4(), test_addr(), tx);
        (handle, rx)
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.count().await, 0);

        let (handle, _rx) = new_handle();
        let id = handle.id();
        registry.register(handle).await;

        assert_eq!(registry.count().await, 1);
        assert!(registry.contains(id).await);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = new_handle();
        let id = handle.id();
        registry.register(handle).await;

        let removed = registry.deregister(id).await;
        assert!(removed.is_some());
        assert_eq!(registry.count().await, 0);

        // Second deregister is a no-op
        assert!(registry.deregister(id).await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_queues_message() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = new_handle();
        let id = handle.id();
        registry.register(handle).await;

        registry.send_to(id, ServerMessage::pong(7)).await.unwrap();

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued, ServerMessage::pong(7));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let registry = ConnectionRegistry::new();
        let result = registry.send_to(Uuid::new_v4(), ServerMessage::pong(1)).await;
        assert!(matches!(result, Err(RegistryError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_send_to_closed_channel() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = new_handle();
        let id = handle.id();
        registry.register(handle).await;
        drop(rx);

        let result = registry.send_to(id, ServerMessage::pong(1)).await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_set_name_and_list_peers() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = new_handle();
        let id = handle.id();
        registry.register(handle).await;

        let previous = registry.set_name(id, "ana").await.unwrap();
        assert!(previous.is_none());

        let previous = registry.set_name(id, "bea").await.unwrap();
        assert_eq!(previous, Some("ana".to_string()));

        assert_eq!(registry.name_of(id).await.unwrap(), Some("bea".to_string()));

        let peers = registry.list_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].connection_id, id);
        assert_eq!(peers[0].name, Some("bea".to_string()));
    }

    #[tokio::test]
    async fn test_set_name_unknown_peer() {
        let registry = ConnectionRegistry::new();
        let result = registry.set_name(Uuid::new_v4(), "ghost").await;
        assert!(matches!(result, Err(RegistryError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_senders_except_excludes_self() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = new_handle();
        let (b, _rx_b) = new_handle();
        let a_id = a.id();
        let b_id = b.id();
        registry.register(a).await;
        registry.register(b).await;

        let senders = registry.senders_except(a_id).await;
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].0, b_id);
    }

    #[tokio::test]
    async fn test_senders_of_skips_unknown_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = new_handle();
        let a_id = a.id();
        registry.register(a).await;

        let senders = registry.senders_of(&[a_id, Uuid::new_v4()]).await;
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].0, a_id);
    }
}
