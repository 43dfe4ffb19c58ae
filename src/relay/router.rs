//! Message router
//!
//! Delivers inbound payloads to target connections per addressing mode:
//! broadcast (everyone else), direct (one peer by id), and room-scoped
//! (fellow members of a named room). Fan-out goes over the registry's
//! per-connection queues, so the router never blocks on a slow client.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::registry::{ConnectionRegistry, RegistryError};
use super::rooms::{RoomDirectory, RoomError};
use crate::server::{ErrorCode, ServerMessage};

/// Errors that can occur during routing
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("Cannot send a direct message to yourself")]
    SelfSend,
}

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Routes payloads between live connections
///
/// Holds shared references to the registry and room directory. Connections
/// whose outbound queue turns out to be closed during fan-out are reaped:
/// removed from the registry and from every room.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
}

impl MessageRouter {
    /// Create a router over the given registry and room directory
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomDirectory>) -> Self {
        Self { registry, rooms }
    }

    /// Relay a payload to every other live connection
    ///
    /// Returns the number of connections the payload was queued for.
    pub async fn broadcast(&self, from: Uuid, body: &str) -> RouterResult<usize> {
        let from_name = self.registry.name_of(from).await?;
        let message = ServerMessage::relayed_broadcast(from, from_name, body);

        let targets = self.registry.senders_except(from).await;
        let delivered = self.fan_out(targets, message).await;

        debug!("Broadcast from {} delivered to {} peer(s)", from, delivered);
        Ok(delivered)
    }

    /// Relay a payload to a single connection by id
    pub async fn direct(&self, from: Uuid, to: Uuid, body: &str) -> RouterResult<()> {
        if from == to {
            return Err(RouterError::SelfSend);
        }

        let from_name = self.registry.name_of(from).await?;
        let message = ServerMessage::relayed_direct(from, from_name, body);

        match self.registry.send_to(to, message).await {
            Ok(()) => {
                debug!("Direct message from {} delivered to {}", from, to);
                Ok(())
            }
            Err(RegistryError::ChannelClosed(id)) => {
                // The peer's socket task is gone; clean up and report it missing
                self.reap(id).await;
                Err(RegistryError::PeerNotFound(id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Relay a payload to the other members of a room
    ///
    /// The sender must be a member. Returns the number of members the payload
    /// was queued for.
    pub async fn room(&self, from: Uuid, room: &str, body: &str) -> RouterResult<usize> {
        if !self.rooms.is_member(from, room).await {
            return Err(RoomError::NotAMember(room.to_string()).into());
        }

        let from_name = self.registry.name_of(from).await?;
        let message = ServerMessage::relayed_room(from, from_name, room, body);

        let members: Vec<Uuid> = self
            .rooms
            .members(room)
            .await
            .into_iter()
            .filter(|id| *id != from)
            .collect();
        let targets = self.registry.senders_of(&members).await;
        let delivered = self.fan_out(targets, message).await;

        debug!(
            "Room message from {} in '{}' delivered to {} member(s)",
            from, room, delivered
        );
        Ok(delivered)
    }

    /// Queue a message on each target, reaping connections with closed queues
    async fn fan_out(
        &self,
        targets: Vec<(Uuid, tokio::sync::mpsc::UnboundedSender<ServerMessage>)>,
        message: ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for (id, sender) in targets {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!("Outbound queue closed for {}, reaping connection", id);
                self.reap(id).await;
            }
        }
        delivered
    }

    /// Remove a dead connection from the registry and all rooms
    async fn reap(&self, id: Uuid) {
        self.registry.deregister(id).await;
        self.rooms.leave_all(id).await;
    }
}

impl From<RouterError> for ServerMessage {
    fn from(err: RouterError) -> Self {
        let code = match &err {
            RouterError::Registry(RegistryError::PeerNotFound(_)) => ErrorCode::PeerNotFound,
            RouterError::Registry(RegistryError::ChannelClosed(_)) => ErrorCode::PeerNotFound,
            RouterError::Room(RoomError::NotAMember(_)) => ErrorCode::NotAMember,
            RouterError::Room(RoomError::RoomLimit(_)) => ErrorCode::RoomLimit,
            RouterError::SelfSend => ErrorCode::SelfSend,
        };
        ServerMessage::error_with_code(err.to_string(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::ConnectionHandle;
    use crate::server::Scope;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomDirectory>,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let rooms = Arc::new(RoomDirectory::new(32));
            let router = MessageRouter::new(Arc::clone(&registry), Arc::clone(&rooms));
            Self {
                registry,
                rooms,
                router,
            }
        }

        async fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = Uuid::new_v4();
            let addr = "127.0.0.1:40000".parse().unwrap();
            self.registry.register(ConnectionHandle::new(id, addr, tx)).await;
            (id, rx)
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.connect().await;
        let (_b, mut rx_b) = fx.connect().await;
        let (_c, mut rx_c) = fx.connect().await;

        let delivered = fx.router.broadcast(a, "hello").await.unwrap();
        assert_eq!(delivered, 2);

        for rx in [&mut rx_b, &mut rx_c] {
            match rx.recv().await.unwrap() {
                ServerMessage::Relayed {
                    from, scope, body, ..
                } => {
                    assert_eq!(from, a);
                    assert_eq!(scope, Scope::Broadcast);
                    assert_eq!(body, "hello");
                }
                other => panic!("Expected Relayed, got {:?}", other),
            }
        }

        // Sender receives nothing
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_carries_sender_name() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;
        let (_b, mut rx_b) = fx.connect().await;

        fx.registry.set_name(a, "ana").await.unwrap();
        fx.router.broadcast(a, "hi").await.unwrap();

        match rx_b.recv().await.unwrap() {
            ServerMessage::Relayed { from_name, .. } => {
                assert_eq!(from_name, Some("ana".to_string()));
            }
            other => panic!("Expected Relayed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_from_unknown_sender() {
        let fx = Fixture::new();
        let result = fx.router.broadcast(Uuid::new_v4(), "hi").await;
        assert!(matches!(
            result,
            Err(RouterError::Registry(RegistryError::PeerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_direct_delivery() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;
        let (b, mut rx_b) = fx.connect().await;

        fx.router.direct(a, b, "psst").await.unwrap();

        match rx_b.recv().await.unwrap() {
            ServerMessage::Relayed {
                from, scope, body, ..
            } => {
                assert_eq!(from, a);
                assert_eq!(scope, Scope::Direct);
                assert_eq!(body, "psst");
            }
            other => panic!("Expected Relayed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_to_self_rejected() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;

        let result = fx.router.direct(a, a, "echo").await;
        assert!(matches!(result, Err(RouterError::SelfSend)));
    }

    #[tokio::test]
    async fn test_direct_to_unknown_peer() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;

        let result = fx.router.direct(a, Uuid::new_v4(), "hi").await;
        assert!(matches!(
            result,
            Err(RouterError::Registry(RegistryError::PeerNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_direct_to_dead_peer_reaps_it() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;
        let (b, rx_b) = fx.connect().await;
        fx.rooms.join(b, "lobby").await.unwrap();
        drop(rx_b);

        let result = fx.router.direct(a, b, "hi").await;
        assert!(matches!(
            result,
            Err(RouterError::Registry(RegistryError::PeerNotFound(_)))
        ));
        assert!(!fx.registry.contains(b).await);
        assert!(fx.rooms.members("lobby").await.is_empty());
    }

    #[tokio::test]
    async fn test_room_delivery_excludes_sender_and_nonmembers() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.connect().await;
        let (b, mut rx_b) = fx.connect().await;
        let (_c, mut rx_c) = fx.connect().await;

        fx.rooms.join(a, "lobby").await.unwrap();
        fx.rooms.join(b, "lobby").await.unwrap();

        let delivered = fx.router.room(a, "lobby", "hi room").await.unwrap();
        assert_eq!(delivered, 1);

        match rx_b.recv().await.unwrap() {
            ServerMessage::Relayed { scope, room, .. } => {
                assert_eq!(scope, Scope::Room);
                assert_eq!(room, Some("lobby".to_string()));
            }
            other => panic!("Expected Relayed, got {:?}", other),
        }

        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_send_requires_membership() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;
        let (b, _rx_b) = fx.connect().await;
        fx.rooms.join(b, "lobby").await.unwrap();

        let result = fx.router.room(a, "lobby", "hi").await;
        assert!(matches!(result, Err(RouterError::Room(RoomError::NotAMember(_)))));
    }

    #[tokio::test]
    async fn test_fan_out_reaps_dead_members() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.connect().await;
        let (b, mut rx_b) = fx.connect().await;
        let (c, rx_c) = fx.connect().await;

        for id in [a, b, c] {
            fx.rooms.join(id, "lobby").await.unwrap();
        }
        drop(rx_c);

        let delivered = fx.router.room(a, "lobby", "hi").await.unwrap();
        assert_eq!(delivered, 1);
        assert!(rx_b.recv().await.is_some());

        // The dead member is gone from registry and room
        assert!(!fx.registry.contains(c).await);
        assert!(!fx.rooms.is_member(c, "lobby").await);
    }

    #[tokio::test]
    async fn test_router_error_to_server_message_codes() {
        let msg: ServerMessage = RouterError::SelfSend.into();
        match msg {
            ServerMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::SelfSend)),
            other => panic!("Expected Error, got {:?}", other),
        }

        let msg: ServerMessage = RouterError::Room(RoomError::NotAMember("x".into())).into();
        match msg {
            ServerMessage::Error { code, .. } => assert_eq!(code, Some(ErrorCode::NotAMember)),
            other => panic!("Expected Error, got {:?}", other),
        }
    }
}
