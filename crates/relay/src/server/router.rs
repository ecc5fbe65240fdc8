//! HTTP Router
//!
//! Sets up the axum router with the WebSocket endpoint and a few HTTP helpers.

use std::fmt::Display;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::HeaderValue,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handler::handle_websocket;
use super::protocol::{ConnectionInfo, RelayMessage};
use super::state::AppState;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::{ConnectionId, Delivery};

const INDEX_HTML: &str = include_str!("index.html");

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let ws_path = state.config().ws_path.clone();
    let cors = cors_layer(state.config());

    Router::new()
        // Test page
        .route("/", get(index))
        // WebSocket endpoint
        .route(&ws_path, get(ws_upgrade))
        // Health check for monitoring/load balancers
        .route("/health", get(health_check))
        .route("/connections", get(list_connections))
        .route("/connections/:id/messages", post(notify))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &RelayConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin: {}", e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// WebSocket upgrade handler
async fn ws_upgrade(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            handshake_error(rejection.body_text());
            return rejection.into_response();
        }
    };

    ws.on_failed_upgrade(|e: axum::Error| {
        handshake_error(e);
    })
    .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Log a failed upgrade. Nothing has been registered at this point.
fn handshake_error(cause: impl Display) -> RelayError {
    let error = RelayError::Handshake(cause.to_string());
    tracing::warn!("{}", error);
    error
}

/// Test page that connects to the WebSocket endpoint and lists what arrives
async fn index(State(state): State<AppState>) -> Html<String> {
    let ws_path =
        serde_json::to_string(&state.config().ws_path).unwrap_or_else(|_| "\"/ws\"".into());
    Html(INDEX_HTML.replace("__WS_PATH__", &ws_path))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connection_count(),
    })
}

async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry().list())
}

#[derive(Debug, Serialize)]
struct NotifyResponse {
    delivered: bool,
}

/// Send a message to one connection only. Unknown ids are a no-op.
async fn notify(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Json<NotifyResponse> {
    let delivered = match id.parse::<ConnectionId>() {
        Ok(id) => matches!(
            state.registry().send_direct(id, RelayMessage::Text(body)),
            Some(Delivery::Queued)
        ),
        Err(_) => false,
    };
    Json(NotifyResponse { delivered })
}
