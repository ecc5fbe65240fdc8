//! Relay - WebSocket Broadcast Chat
//!
//! This crate provides a small chat relay:
//! - A registry of live WebSocket connections keyed by server-assigned ids
//! - Fan-out of every inbound message to all connections, or to one by id
//! - Text (`"<id>: <text>"`) and structured (`{clientId, message}`) payload modes
//! - Layered configuration (defaults, TOML file, `RELAY_*` environment)

// Configuration
pub mod config;

// Error types
pub mod error;

// Connection registry and broadcast
pub mod registry;

// WebSocket server
pub mod server;

pub use error::{RelayError, Result};
