//! WebSocket server implementation
//!
//! Provides a WebSocket server that listens on a configurable port, upgrades
//! incoming TCP connections, and relays messages between clients.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{ClientEnvelope, ClientMessage, ErrorCode, Scope, ServerMessage};
use crate::config::RelayLimits;
use crate::relay::{ConnectionRegistry, MessageRouter, RoomDirectory, SessionManager};

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Resource caps
    pub limits: RelayLimits,
}

impl ServerConfig {
    /// Create a new server configuration with default limits
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            limits: RelayLimits::default(),
        }
    }

    /// Set the resource limits
    pub fn with_limits(mut self, limits: RelayLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Shared relay components handed to every connection task
#[derive(Clone)]
struct RelayState {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
    router: Arc<MessageRouter>,
    sessions: Arc<SessionManager>,
}

impl RelayState {
    fn new(limits: RelayLimits) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomDirectory::new(limits.max_rooms_per_connection));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&registry),
            Arc::clone(&rooms),
            limits.max_connections,
        ));
        Self {
            registry,
            rooms,
            router,
            sessions,
        }
    }
}

/// WebSocket relay server
pub struct RelayServer {
    config: ServerConfig,
    state: RelayState,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = RelayState::new(config.limits);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Run the relay server
    ///
    /// This will listen for incoming connections and handle them concurrently.
    /// The server will shut down gracefully when a shutdown signal is received.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket relay listening on ws://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let state = self.state.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, state, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let remaining = self.state.registry.count().await;
        if remaining > 0 {
            info!("Waiting for {} active connections to close...", remaining);
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!("New connection from {}", peer_addr);

    // Upgrade to WebSocket
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Register the session; its outbound queue is drained into the sink below
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let connection_id = match state.sessions.connect(peer_addr, outbound_tx).await {
        Ok(id) => id,
        Err(e) => {
            let refusal: ServerMessage = e.into();
            let json = serde_json::to_string(&refusal)?;
            ws_sender.send(Message::Text(json)).await?;
            let _ = ws_sender.send(Message::Close(None)).await;
            return Ok(());
        }
    };

    // Send welcome message
    let welcome_json = serde_json::to_string(&ServerMessage::welcome(connection_id))?;
    ws_sender.send(Message::Text(welcome_json)).await?;
    debug!("Sent welcome to {} as {}", peer_addr, connection_id);

    let result = connection_loop(
        connection_id,
        peer_addr,
        &state,
        &mut ws_sender,
        &mut ws_receiver,
        &mut outbound_rx,
        &mut shutdown_rx,
    )
    .await;

    // Cleanup runs on every exit path, including socket errors
    state.sessions.disconnect(connection_id).await;
    info!("Connection from {} closed", peer_addr);
    result
}

/// Message handling loop for one connection
#[allow(clippy::too_many_arguments)]
async fn connection_loop(
    connection_id: Uuid,
    peer_addr: SocketAddr,
    state: &RelayState,
    ws_sender: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            // Drain the outbound queue into the socket
            queued = outbound_rx.recv() => {
                match queued {
                    Some(message) => {
                        let json = serde_json::to_string(&message)?;
                        ws_sender.send(Message::Text(json)).await?;
                    }
                    None => {
                        // Queue closed: the connection was reaped elsewhere
                        debug!("Outbound queue for {} closed", connection_id);
                        break;
                    }
                }
            }
            // Receive messages from the client
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received message from {}: {}", peer_addr, text);

                        let response = dispatch_message(&text, connection_id, state).await;
                        let response_json = serde_json::to_string(&response)?;
                        ws_sender.send(Message::Text(response_json)).await?;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes)", peer_addr, data.len());
                        let err = ServerMessage::error_with_code(
                            "Binary frames are not supported",
                            ErrorCode::InvalidMessage,
                        );
                        ws_sender.send(Message::Text(serde_json::to_string(&err)?)).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pong messages
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} requested close", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by {}", peer_addr);
                        break;
                    }
                }
            }
            // Handle shutdown signal
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection to {}", peer_addr);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    Ok(())
}

/// Handle a client message and return the response for the sender
///
/// Relayed payloads and lifecycle notifications reach other connections
/// through their outbound queues; the returned message goes back to the
/// sender only.
async fn dispatch_message(
    text: &str,
    connection_id: Uuid,
    state: &RelayState,
) -> ServerMessage {
    let envelope = match ClientEnvelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(e) => return e.into(),
    };

    match envelope.message {
        ClientMessage::Ping { seq } => {
            debug!("Received ping with seq {}", seq);
            ServerMessage::pong(seq)
        }
        ClientMessage::SetName { name } => {
            match state.sessions.rename(connection_id, &name).await {
                Ok(()) => ServerMessage::NameChanged {
                    connection_id,
                    name,
                },
                Err(e) => e.into(),
            }
        }
        ClientMessage::Broadcast { body } => {
            match state.router.broadcast(connection_id, &body).await {
                Ok(delivered) => ServerMessage::delivery(Scope::Broadcast, delivered),
                Err(e) => e.into(),
            }
        }
        ClientMessage::Direct { to, body } => {
            match state.router.direct(connection_id, to, &body).await {
                Ok(()) => ServerMessage::delivery(Scope::Direct, 1),
                Err(e) => e.into(),
            }
        }
        ClientMessage::JoinRoom { room } => {
            match state.sessions.join_room(connection_id, &room).await {
                Ok(members) => ServerMessage::RoomJoined { room, members },
                Err(e) => e.into(),
            }
        }
        ClientMessage::LeaveRoom { room } => {
            match state.sessions.leave_room(connection_id, &room).await {
                Ok(()) => ServerMessage::RoomLeft { room },
                Err(e) => e.into(),
            }
        }
        ClientMessage::RoomSend { room, body } => {
            match state.router.room(connection_id, &room, &body).await {
                Ok(delivered) => ServerMessage::delivery(Scope::Room, delivered),
                Err(e) => e.into(),
            }
        }
        ClientMessage::ListPeers => ServerMessage::PeerList {
            peers: state.registry.list_peers().await,
        },
        ClientMessage::ListRooms => ServerMessage::RoomList {
            rooms: state.rooms.list_rooms().await,
        },
    }
}
