//! WebSocket server module
//!
//! Handles WebSocket connections from relay clients: protocol parsing,
//! per-connection tasks, and graceful shutdown.

mod protocol;
mod websocket;

pub use protocol::*;
pub use websocket::*;
