// WebSocket session handling: one task per socket, translating transport
// events (connect, frames, disconnect) into registry and fanout calls.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tally_common::protocol::ws::{decode_message, encode_message, WsMessage};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope};
use crate::fanout::{broadcast_snapshot, ConnectionHub};
use crate::registry::{ConnectionRegistry, RegistryError};

#[derive(Clone)]
pub struct SessionRouterState {
    pub registry: ConnectionRegistry,
    pub hub: ConnectionHub,
}

pub fn router(registry: ConnectionRegistry, hub: ConnectionHub) -> Router {
    let state = SessionRouterState { registry, hub };
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(
    State(state): State<SessionRouterState>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.on_upgrade(move |socket| async move {
        with_request_id_scope(request_id, handle_socket(state, socket)).await;
    })
}

/// Drives one connection from connect to disconnect.
async fn handle_socket(state: SessionRouterState, mut socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    // Connect: register first, then open the delivery channel. A store
    // failure here is terminal for the session.
    if let Err(registry_error) = state.registry.register(&connection_id).await {
        error!(%connection_id, %registry_error, %request_id, "failed to register connection");
        let frame = WsMessage::Error {
            code: "INTERNAL_ERROR".to_string(),
            message: "failed to register connection".to_string(),
        };
        if let Ok(encoded) = encode_message(&frame) {
            let _ = socket.send(Message::Text(encoded.into())).await;
        }
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    state.hub.register(&connection_id, outbound_tx).await;

    info!(%connection_id, %request_id, "connection registered");

    let welcome = WsMessage::Welcome { connection_id: connection_id.clone() };
    if send_frame(&mut socket, &welcome).await.is_err() {
        finish_session(&state, &connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(message) => {
                    if send_frame(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(raw))) => {
                    handle_frame(&state, &connection_id, raw.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Binary/ping/pong frames are not part of the protocol.
                }
                Some(Err(socket_error)) => {
                    debug!(%connection_id, %socket_error, "socket errored; treating as disconnect");
                    break;
                }
            },
        }
    }

    finish_session(&state, &connection_id).await;
}

/// Dispatch one inbound frame. Unrecognized input is ignored — the
/// transport default route is a no-op success.
async fn handle_frame(state: &SessionRouterState, connection_id: &str, raw: &str) {
    match decode_message(raw) {
        Ok(WsMessage::Update { value }) => {
            handle_update(state, connection_id, value).await;
        }
        Ok(other) => {
            debug!(connection_id, frame = ?other, "ignoring unexpected client frame");
        }
        Err(decode_error) => {
            debug!(connection_id, %decode_error, "ignoring undecodable frame");
        }
    }
}

/// Group update: apply the value to every registered connection, then fan
/// the resulting snapshot out to all of them.
async fn handle_update(state: &SessionRouterState, connection_id: &str, value: serde_json::Value) {
    match state.registry.update_all(value).await {
        Ok(connections) => {
            let report = broadcast_snapshot(&connections, &state.hub).await;
            debug!(
                connection_id,
                delivered = report.delivered_count(),
                failed = report.failed_count(),
                "update broadcast settled"
            );
        }
        Err(registry_error) => {
            warn!(connection_id, %registry_error, "group update failed");
            let frame = WsMessage::Error {
                code: error_code_for(&registry_error).to_string(),
                message: registry_error.to_string(),
            };
            // Error goes to the sender only; everyone else keeps their
            // last good snapshot.
            let _ = state.hub.send_to(connection_id, frame).await;
        }
    }
}

/// Disconnect: drop the delivery channel, delete the record, and show the
/// departure to everyone still connected. Errors are logged, not retried.
async fn finish_session(state: &SessionRouterState, connection_id: &str) {
    state.hub.remove(connection_id).await;

    if let Err(registry_error) = state.registry.unregister(connection_id).await {
        error!(connection_id, %registry_error, "failed to unregister connection");
    }

    match state.registry.list_all().await {
        Ok(remaining) => {
            let report = broadcast_snapshot(&remaining, &state.hub).await;
            info!(
                connection_id,
                remaining = remaining.len(),
                delivered = report.delivered_count(),
                failed = report.failed_count(),
                "connection closed"
            );
        }
        Err(registry_error) => {
            error!(connection_id, %registry_error, "failed to load snapshot after disconnect");
        }
    }
}

fn error_code_for(error: &RegistryError) -> &'static str {
    match error {
        RegistryError::NotFound { .. } => "NOT_FOUND",
        RegistryError::Store(_) => "INTERNAL_ERROR",
    }
}

async fn send_frame(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}
