//! WebSocket Server
//!
//! Accepts WebSocket connections and relays every message to all of them.

mod handler;
mod protocol;
mod router;
mod state;

pub use handler::*;
pub use protocol::*;
pub use router::*;
pub use state::*;
