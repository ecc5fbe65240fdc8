//! Server Application State
//!
//! Shared state accessible by all WebSocket handlers.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::registry::{BroadcastReport, ConnectionId, Registry};

use super::protocol::{Inbound, RelayMessage};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RelayConfig,

    /// Connected clients
    registry: Registry,
}

impl AppState {
    /// Create new application state
    pub fn new(config: RelayConfig) -> Self {
        let registry = Registry::new(config.outbound_queue_capacity, config.overflow_policy);
        Self {
            inner: Arc::new(AppStateInner { config, registry }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Get the number of connected clients
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Parse a frame from `sender`, tag it and broadcast it per the configured
    /// payload mode and echo policy.
    ///
    /// A sender that has already been removed from the registry is closed and
    /// relays nothing.
    pub fn relay(&self, sender: ConnectionId, frame: &str) -> Result<BroadcastReport> {
        if !self.inner.registry.contains(sender) {
            return Err(RelayError::ConnectionClosed(sender));
        }
        let config = &self.inner.config;
        let inbound = Inbound::parse(config.mode, frame)?;
        let message = RelayMessage::tagged(sender, inbound, config.structured_sender);
        let exclude = (!config.echo_to_sender).then_some(sender);
        Ok(self.inner.registry.broadcast(&message, exclude))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PayloadMode, SenderTag};

    #[test]
    fn test_relay_text_echoes_to_sender() {
        let state = AppState::new(RelayConfig::default());
        let (a, mut rx_a) = state.registry().register();
        let (_b, mut rx_b) = state.registry().register();

        let report = state.relay(a, "hello").unwrap();
        assert_eq!(report.attempted, 2);

        let expected = RelayMessage::Text(format!("{}: hello", a));
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_b.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_relay_without_echo() {
        let state = AppState::new(RelayConfig {
            echo_to_sender: false,
            ..Default::default()
        });
        let (a, mut rx_a) = state.registry().register();
        let (_b, mut rx_b) = state.registry().register();

        state.relay(a, "hello").unwrap();
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_relay_structured_server_tag() {
        let state = AppState::new(RelayConfig {
            mode: PayloadMode::Structured,
            structured_sender: SenderTag::Server,
            ..Default::default()
        });
        let (a, mut rx_a) = state.registry().register();

        state
            .relay(a, r#"{"clientId":"someone-else","message":"hi"}"#)
            .unwrap();
        match rx_a.try_recv().unwrap() {
            RelayMessage::Chat(chat) => assert_eq!(chat.client_id, a.to_string()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_relay_from_removed_sender_is_refused() {
        let state = AppState::new(RelayConfig::default());
        let (a, _rx_a) = state.registry().register();
        let (_b, mut rx_b) = state.registry().register();

        state.registry().remove(a);
        let result = state.relay(a, "still talking");
        assert!(matches!(result, Err(RelayError::ConnectionClosed(id)) if id == a));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_relay_malformed_broadcasts_nothing() {
        let state = AppState::new(RelayConfig {
            mode: PayloadMode::Structured,
            ..Default::default()
        });
        let (a, mut rx_a) = state.registry().register();

        let result = state.relay(a, "not json");
        assert!(matches!(result, Err(RelayError::MalformedPayload(_))));
        assert!(rx_a.try_recv().is_err());
    }
}
