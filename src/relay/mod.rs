//! Relay coordination module
//!
//! Connection registry, room directory, message router, and session
//! lifecycle management.

mod lifecycle;
mod registry;
mod rooms;
mod router;

pub use lifecycle::*;
pub use registry::*;
pub use rooms::*;
pub use router::*;
