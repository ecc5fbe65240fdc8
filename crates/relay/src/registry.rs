//! Connection Registry
//!
//! The set of live connections, keyed by a server-assigned id. Each entry
//! holds the sending half of a bounded queue; the connection's writer task
//! drains the other half into the WebSocket.
//!
//! Broadcast takes a snapshot of the registered senders and then delivers
//! without holding any map lock, so concurrent registration and removal never
//! block on (or deadlock with) a broadcast in progress.
//!
//! Every entry also carries a close signal. Removing the entry fires it, so
//! the connection's tasks stop even when the writer is stuck on a stalled
//! socket.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use ts_rs::TS;
use uuid::Uuid;

use crate::config::OverflowPolicy;
use crate::server::{ConnectionInfo, RelayMessage};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, type = "string")]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A registered connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<RelayMessage>,
    closed: CancellationToken,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<RelayMessage>) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            connected_at: self.connected_at,
        }
    }
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the writer
    Queued,
    /// Queue full, message dropped, connection kept
    Dropped,
    /// Queue closed or full under the disconnect policy; connection removed
    Disconnected,
}

/// Summary of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of connections a send was attempted on
    pub attempted: usize,
    pub queued: usize,
    pub dropped: usize,
    /// Connections removed because their send failed
    pub disconnected: Vec<ConnectionId>,
}

/// Registry of all live connections
#[derive(Debug)]
pub struct Registry {
    connections: DashMap<ConnectionId, Connection>,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl Registry {
    /// Create an empty registry. `queue_capacity` must be non-zero.
    pub fn new(queue_capacity: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            overflow_policy,
        }
    }

    /// Register a new connection under a fresh id.
    ///
    /// Returns the id and the receiving half of its outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<RelayMessage>) {
        loop {
            let id = ConnectionId::new();
            if let Some(rx) = self.register_as(id) {
                return (id, rx);
            }
        }
    }

    /// Register a connection under a specific id.
    ///
    /// Returns `None` if the id is already registered.
    pub fn register_as(&self, id: ConnectionId) -> Option<mpsc::Receiver<RelayMessage>> {
        match self.connections.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                entry.insert(Connection::new(id, tx));
                Some(rx)
            }
        }
    }

    /// Remove a connection and fire its close signal. Dropping its sender
    /// ends the connection's writer once the queue drains. Returns whether it
    /// was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, connection)) => {
                connection.closed.cancel();
                true
            }
            None => false,
        }
    }

    /// Token cancelled when the connection leaves the registry.
    ///
    /// `None` if the id is not registered.
    pub fn close_signal(&self, id: ConnectionId) -> Option<CancellationToken> {
        self.connections.get(&id).map(|entry| entry.closed.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.connections.iter().map(|entry| entry.info()).collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }

    /// Deliver a message to every connection registered at the time of the
    /// call, optionally skipping one (the sender).
    ///
    /// Each send is independent. A connection whose send fails is removed and
    /// the remaining deliveries proceed.
    pub fn broadcast(
        &self,
        message: &RelayMessage,
        exclude: Option<ConnectionId>,
    ) -> BroadcastReport {
        let recipients: Vec<Connection> = self
            .connections
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .map(|entry| entry.value().clone())
            .collect();

        let mut report = BroadcastReport {
            attempted: recipients.len(),
            ..Default::default()
        };

        for connection in &recipients {
            match self.deliver(connection, message.clone()) {
                Delivery::Queued => report.queued += 1,
                Delivery::Dropped => report.dropped += 1,
                Delivery::Disconnected => report.disconnected.push(connection.id),
            }
        }

        tracing::debug!(
            attempted = report.attempted,
            queued = report.queued,
            dropped = report.dropped,
            disconnected = report.disconnected.len(),
            "Broadcast complete"
        );

        report
    }

    /// Deliver a message to one connection. Unknown ids are a no-op.
    ///
    /// Returns `Some(outcome)` if the connection was registered.
    pub fn send_direct(&self, id: ConnectionId, message: RelayMessage) -> Option<Delivery> {
        let connection = self.connections.get(&id).map(|entry| entry.value().clone())?;
        Some(self.deliver(&connection, message))
    }

    fn deliver(&self, connection: &Connection, message: RelayMessage) -> Delivery {
        match connection.tx.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => match self.overflow_policy {
                OverflowPolicy::Drop => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        "Outbound queue full, dropping message"
                    );
                    Delivery::Dropped
                }
                OverflowPolicy::Disconnect => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        "Outbound queue full, disconnecting slow consumer"
                    );
                    self.remove(connection.id);
                    Delivery::Disconnected
                }
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection.id, "Outbound queue closed");
                self.remove(connection.id);
                Delivery::Disconnected
            }
        }
    }
}
