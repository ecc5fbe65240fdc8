//! WebSocket Connection Handler
//!
//! Drives one connection from accept to cleanup: a writer task drains the
//! connection's outbound queue into the socket while the reader relays every
//! inbound frame to the registry.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::RelayMessage;
use super::state::AppState;
use crate::config::MalformedPolicy;
use crate::error::RelayError;
use crate::registry::ConnectionId;

/// How long the writer gets to flush and send a close frame after cleanup
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Handle an upgraded WebSocket connection
pub async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (id, outbound, closed) = accept(&state);
    let (ws_sender, ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(write_loop(ws_sender, outbound, id));

    let recv_state = state.clone();
    let mut recv_task =
        tokio::spawn(async move { receive_loop(ws_receiver, id, &recv_state).await });

    // Wait for either side to finish, or for the registry to drop the connection
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        reason = &mut recv_task => {
            match reason {
                Ok(reason) => log_exit(id, &reason),
                Err(e) => tracing::warn!(connection_id = %id, "Receive task failed: {}", e),
            }
        },
        _ = closed.cancelled() => {
            // Removed by the registry, e.g. a slow consumer under the disconnect policy
            recv_task.abort();
            tracing::info!(connection_id = %id, "Connection removed from registry, closing");
        },
    }

    cleanup(&state, id);

    // Dropping the registry's sender lets the writer drain and close
    if !send_task.is_finished()
        && tokio::time::timeout(CLOSE_GRACE, &mut send_task).await.is_err()
    {
        send_task.abort();
    }
}

/// Register a freshly upgraded connection under a new id.
///
/// Returns the id, the outbound queue the writer should drain and the signal
/// fired when the connection leaves the registry.
pub fn accept(
    state: &AppState,
) -> (ConnectionId, mpsc::Receiver<RelayMessage>, CancellationToken) {
    let (id, outbound) = state.registry().register();
    let closed = state.registry().close_signal(id).unwrap_or_else(|| {
        // removed before we could look it up
        let token = CancellationToken::new();
        token.cancel();
        token
    });
    tracing::info!(
        connection_id = %id,
        connections = state.connection_count(),
        "Client connected"
    );
    (id, outbound, closed)
}

/// Remove a connection from the registry. Safe to call more than once.
pub fn cleanup(state: &AppState, id: ConnectionId) -> bool {
    let removed = state.registry().remove(id);
    if removed {
        tracing::info!(
            connection_id = %id,
            connections = state.connection_count(),
            "Client removed"
        );
    }
    removed
}

/// Read frames until the connection ends, relaying each one.
///
/// Returns the reason the loop stopped.
pub async fn receive_loop<S>(mut stream: S, id: ConnectionId, state: &AppState) -> RelayError
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let idle_timeout = state.config().idle_timeout();
    let malformed_policy = state.config().malformed_policy;

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => return RelayError::IdleTimeout(limit),
            },
            None => stream.next().await,
        };

        let frame = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => {
                    let error = RelayError::MalformedPayload(e.to_string());
                    match malformed_policy {
                        MalformedPolicy::Skip => {
                            tracing::warn!(connection_id = %id, "Skipping frame: {}", error);
                            continue;
                        }
                        MalformedPolicy::Close => return error,
                    }
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // Pong is handled automatically by axum
                tracing::trace!(connection_id = %id, "Control frame");
                continue;
            }
            Some(Ok(Message::Close(_))) | None => return RelayError::ConnectionClosed(id),
            Some(Err(e)) => return e.into(),
        };

        match state.relay(id, &frame) {
            Ok(report) => {
                tracing::debug!(
                    connection_id = %id,
                    recipients = report.attempted,
                    "Relayed message"
                );
            }
            Err(error @ RelayError::MalformedPayload(_)) => match malformed_policy {
                MalformedPolicy::Skip => {
                    tracing::warn!(connection_id = %id, "Skipping frame: {}", error);
                }
                MalformedPolicy::Close => return error,
            },
            Err(error) => return error,
        }
    }
}

/// Forward queued messages to the socket until the queue closes.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<RelayMessage>,
    id: ConnectionId,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(message) = outbound.recv().await {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(connection_id = %id, "Failed to encode message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(frame.into())).await {
            tracing::debug!(connection_id = %id, "Send failed: {}", e);
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

fn log_exit(id: ConnectionId, reason: &RelayError) {
    match reason {
        RelayError::ConnectionClosed(_) => {
            tracing::info!(connection_id = %id, "Client disconnected");
        }
        RelayError::IdleTimeout(_) => {
            tracing::info!(connection_id = %id, "Closing idle connection: {}", reason);
        }
        other => {
            tracing::warn!(connection_id = %id, "Closing connection: {}", other);
        }
    }
}
