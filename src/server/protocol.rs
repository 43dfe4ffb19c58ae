//! Protocol message definitions
//!
//! Defines the JSON messages exchanged between relay clients and the server.
//! All messages are tagged by `type` and carry version information for
//! compatibility.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current protocol version
/// Increment when making breaking changes to message format
pub const PROTOCOL_VERSION: u32 = 1;

/// Minimum supported protocol version
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Maximum message body length (64 KiB)
pub const MAX_BODY_LENGTH: usize = 64 * 1024;

/// Maximum display name length
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum room name length
pub const MAX_ROOM_NAME_LENGTH: usize = 128;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Protocol version {0} not supported (min: {MIN_PROTOCOL_VERSION}, current: {PROTOCOL_VERSION})")]
    UnsupportedVersion(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Message Envelope
// ============================================================================

/// Protocol envelope wrapping all client messages
/// Includes version for compatibility checking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Protocol version used by the client
    #[serde(default = "default_version")]
    pub version: u32,
    /// The actual message payload
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Protocol envelope wrapping all server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    /// Protocol version used by the server
    pub version: u32,
    /// The actual message payload
    #[serde(flatten)]
    pub message: ServerMessage,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

impl ClientEnvelope {
    /// Create a new client envelope with the current protocol version
    pub fn new(message: ClientMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    /// Parse and validate a client envelope from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let envelope: Self = serde_json::from_str(json)?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Validate the envelope and its contents
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.version < MIN_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }

        self.message.validate()
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEnvelope {
    /// Create a new server envelope with the current protocol version
    pub fn new(message: ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a server envelope from JSON (primarily for testing)
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Addressing
// ============================================================================

/// Addressing mode of a relayed payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Delivered to every other live connection
    Broadcast,
    /// Delivered to a single connection by id
    Direct,
    /// Delivered to the members of a named room
    Room,
}

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection keepalive ping
    Ping {
        /// Sequence number for tracking round-trip time
        seq: u64,
    },

    /// Set the display name for this connection
    SetName {
        /// Display name (advisory label, not an identity)
        name: String,
    },

    /// Send a payload to every other connection
    Broadcast {
        /// The payload to relay
        body: String,
    },

    /// Send a payload to one connection
    Direct {
        /// Target connection id
        to: Uuid,
        /// The payload to relay
        body: String,
    },

    /// Join a named room (created implicitly on first join)
    JoinRoom {
        /// Room name
        room: String,
    },

    /// Leave a named room
    LeaveRoom {
        /// Room name
        room: String,
    },

    /// Send a payload to every other member of a room
    RoomSend {
        /// Room name
        room: String,
        /// The payload to relay
        body: String,
    },

    /// List all live connections
    ListPeers,

    /// List all rooms with member counts
    ListRooms,
}

fn validate_body(body: &str) -> ProtocolResult<()> {
    if body.len() > MAX_BODY_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "body exceeds maximum length of {} bytes",
            MAX_BODY_LENGTH
        )));
    }
    Ok(())
}

fn validate_room_name(room: &str) -> ProtocolResult<()> {
    if room.is_empty() {
        return Err(ProtocolError::ValidationError(
            "room name cannot be empty".to_string(),
        ));
    }
    if room.len() > MAX_ROOM_NAME_LENGTH {
        return Err(ProtocolError::ValidationError(format!(
            "room name exceeds maximum length of {} characters",
            MAX_ROOM_NAME_LENGTH
        )));
    }
    if room.chars().any(|c| c.is_control()) {
        return Err(ProtocolError::ValidationError(
            "room name cannot contain control characters".to_string(),
        ));
    }
    Ok(())
}

impl ClientMessage {
    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::Ping { .. } => Ok(()),

            ClientMessage::SetName { name } => {
                if name.is_empty() {
                    return Err(ProtocolError::ValidationError(
                        "name cannot be empty".to_string(),
                    ));
                }
                if name.len() > MAX_NAME_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "name exceeds maximum length of {} characters",
                        MAX_NAME_LENGTH
                    )));
                }
                if name.chars().any(|c| c.is_control()) {
                    return Err(ProtocolError::ValidationError(
                        "name cannot contain control characters".to_string(),
                    ));
                }
                Ok(())
            }

            ClientMessage::Broadcast { body } => validate_body(body),

            ClientMessage::Direct { body, .. } => validate_body(body),

            ClientMessage::JoinRoom { room } => validate_room_name(room),

            ClientMessage::LeaveRoom { room } => validate_room_name(room),

            ClientMessage::RoomSend { room, body } => {
                validate_room_name(room)?;
                validate_body(body)
            }

            ClientMessage::ListPeers => Ok(()),

            ClientMessage::ListRooms => Ok(()),
        }
    }

    /// Create a Ping message
    pub fn ping(seq: u64) -> Self {
        ClientMessage::Ping { seq }
    }

    /// Create a SetName message
    pub fn set_name(name: impl Into<String>) -> Self {
        ClientMessage::SetName { name: name.into() }
    }

    /// Create a Broadcast message
    pub fn broadcast(body: impl Into<String>) -> Self {
        ClientMessage::Broadcast { body: body.into() }
    }

    /// Create a Direct message
    pub fn direct(to: Uuid, body: impl Into<String>) -> Self {
        ClientMessage::Direct {
            to,
            body: body.into(),
        }
    }

    /// Create a JoinRoom message
    pub fn join_room(room: impl Into<String>) -> Self {
        ClientMessage::JoinRoom { room: room.into() }
    }

    /// Create a LeaveRoom message
    pub fn leave_room(room: impl Into<String>) -> Self {
        ClientMessage::LeaveRoom { room: room.into() }
    }

    /// Create a RoomSend message
    pub fn room_send(room: impl Into<String>, body: impl Into<String>) -> Self {
        ClientMessage::RoomSend {
            room: room.into(),
            body: body.into(),
        }
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message sent on connection
    Welcome {
        /// Server protocol version
        version: u32,
        /// Identifier assigned to this connection
        connection_id: Uuid,
    },

    /// Response to Ping
    Pong {
        /// Echo back the sequence number
        seq: u64,
    },

    /// A payload relayed from another connection
    Relayed {
        /// Originating connection id
        from: Uuid,
        /// Display name of the origin, if set
        #[serde(skip_serializing_if = "Option::is_none")]
        from_name: Option<String>,
        /// How the payload was addressed
        scope: Scope,
        /// Room name for room-scoped payloads
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        /// The payload
        body: String,
    },

    /// A new connection was registered
    PeerJoined {
        /// Id of the new connection
        connection_id: Uuid,
        /// Display name, if set
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// A connection was deregistered
    PeerLeft {
        /// Id of the departed connection
        connection_id: Uuid,
    },

    /// A connection changed its display name
    NameChanged {
        /// Id of the renamed connection
        connection_id: Uuid,
        /// The new display name
        name: String,
    },

    /// Confirmation of a room join
    RoomJoined {
        /// Room name
        room: String,
        /// Current member ids, including the joiner
        members: Vec<Uuid>,
    },

    /// Confirmation of a room leave
    RoomLeft {
        /// Room name
        room: String,
    },

    /// List of live connections
    PeerList {
        /// Peer information
        peers: Vec<PeerInfo>,
    },

    /// List of rooms
    RoomList {
        /// Room information
        rooms: Vec<RoomInfo>,
    },

    /// Fan-out receipt for broadcast and room sends
    Delivery {
        /// Addressing mode of the send
        scope: Scope,
        /// Number of connections the payload was queued for
        delivered: usize,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code for programmatic handling
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        /// Related connection id if applicable
        #[serde(skip_serializing_if = "Option::is_none")]
        related: Option<Uuid>,
    },
}

/// Information about a live connection for listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerInfo {
    /// Connection id
    pub connection_id: Uuid,
    /// Display name, if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Information about a room for listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomInfo {
    /// Room name
    pub room: String,
    /// Number of members
    pub members: usize,
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Target connection not found
    PeerNotFound,
    /// Sender is not a member of the room
    NotAMember,
    /// Room membership limit reached
    RoomLimit,
    /// Connection limit reached
    ServerFull,
    /// Direct message addressed to the sender itself
    SelfSend,
    /// Unsupported protocol version
    UnsupportedVersion,
    /// Internal server error
    InternalError,
}

impl ServerMessage {
    /// Create a Welcome message
    pub fn welcome(connection_id: Uuid) -> Self {
        ServerMessage::Welcome {
            version: PROTOCOL_VERSION,
            connection_id,
        }
    }

    /// Create a Pong message
    pub fn pong(seq: u64) -> Self {
        ServerMessage::Pong { seq }
    }

    /// Create a broadcast-scoped Relayed message
    pub fn relayed_broadcast(
        from: Uuid,
        from_name: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        ServerMessage::Relayed {
            from,
            from_name,
            scope: Scope::Broadcast,
            room: None,
            body: body.into(),
        }
    }

    /// Create a direct-scoped Relayed message
    pub fn relayed_direct(from: Uuid, from_name: Option<String>, body: impl Into<String>) -> Self {
        ServerMessage::Relayed {
            from,
            from_name,
            scope: Scope::Direct,
            room: None,
            body: body.into(),
        }
    }

    /// Create a room-scoped Relayed message
    pub fn relayed_room(
        from: Uuid,
        from_name: Option<String>,
        room: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        ServerMessage::Relayed {
            from,
            from_name,
            scope: Scope::Room,
            room: Some(room.into()),
            body: body.into(),
        }
    }

    /// Create a PeerJoined message
    pub fn peer_joined(connection_id: Uuid, name: Option<String>) -> Self {
        ServerMessage::PeerJoined {
            connection_id,
            name,
        }
    }

    /// Create a PeerLeft message
    pub fn peer_left(connection_id: Uuid) -> Self {
        ServerMessage::PeerLeft { connection_id }
    }

    /// Create a Delivery receipt
    pub fn delivery(scope: Scope, delivered: usize) -> Self {
        ServerMessage::Delivery { scope, delivered }
    }

    /// Create an Error message with code
    pub fn error_with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        ServerMessage::Error {
            message: message.into(),
            code: Some(code),
            related: None,
        }
    }

}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<ProtocolError> for ServerMessage {
    fn from(err: ProtocolError) -> Self {
        let code = match &err {
            ProtocolError::SerializationError(_) => ErrorCode::InvalidMessage,
            ProtocolError::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            ProtocolError::ValidationError(_) => ErrorCode::InvalidMessage,
        };
        ServerMessage::error_with_code(err.to_string(), code)
    }
}

// ============================================================================
// Tests
// ============================================================================
