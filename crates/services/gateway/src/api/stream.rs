//! WebSocket streaming endpoint
//!
//! One socket per client per session. Inbound frames run through the
//! measurement pipeline; outbound events arrive from the hub over the
//! connection's channel and are forwarded to the socket. Per-frame errors
//! go back to the offending client only; they never end the connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::sessions::ErrorResponse;
use super::AppState;
use crate::auth::Identity;
use crate::protocol::{ClientFrame, ServerEvent};

/// Outbound queue per connection. Must exceed the replay buffer so
/// admission can always deliver the backlog without blocking.
const OUTBOUND_QUEUE: usize = 256;

/// Query parameters for the stream endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Connection token issued by the identity service
    pub token: String,
}

/// Attach a streaming client to a session
///
/// GET /api/sessions/:id/stream?token=...
pub async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Authentication and session existence are checked before the upgrade
    // so rejections surface as plain HTTP errors.
    let identity = match state.authenticator.authenticate(&query.token) {
        Ok(identity) => identity,
        Err(e) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "authentication_failed".to_string(),
                    message: e.to_string(),
                }),
            )
                .into_response();
        }
    };
    if let Err(e) = state.manager.status(&session_id).await {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "session_not_found".to_string(),
                message: e.to_string(),
            }),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String, identity: Identity) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);

    let client_id = match state.hub.admit(&session_id, &identity, tx).await {
        Ok(client_id) => client_id,
        Err(e) => {
            let event = ServerEvent::Error {
                message: e.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&event) {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    // Forward hub events to the socket until either side goes away.
    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                handle_frame(&state, &session_id, &client_id, &identity, &text).await;
            }
            // Protocol-level pings are answered by axum; both directions
            // count as liveness.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                state.hub.heartbeat(&session_id, &client_id).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    session_id = %session_id,
                    client_id = %client_id,
                    error = %e,
                    "socket error"
                );
                break;
            }
        }
    }

    state.hub.remove(&session_id, &client_id).await;
    forward.abort();
}

async fn handle_frame(
    state: &AppState,
    session_id: &str,
    client_id: &str,
    identity: &Identity,
    text: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            state
                .hub
                .send_to(
                    session_id,
                    client_id,
                    ServerEvent::Error {
                        message: format!("invalid frame: {e}"),
                    },
                )
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Ping => {
            state.hub.heartbeat(session_id, client_id).await;
            state
                .hub
                .send_to(session_id, client_id, ServerEvent::Pong)
                .await;
        }
        ClientFrame::Pong => {
            state.hub.heartbeat(session_id, client_id).await;
        }
        ClientFrame::TestData { test_type, data } => {
            if !identity.role.may_submit() {
                state
                    .hub
                    .send_to(
                        session_id,
                        client_id,
                        ServerEvent::Error {
                            message: "role may not submit measurements".to_string(),
                        },
                    )
                    .await;
                return;
            }
            // Accepted frames answer through the broadcast; only rejections
            // come back directly.
            if let Err(e) = state
                .manager
                .submit_measurement(session_id, &test_type, &data)
                .await
            {
                state
                    .hub
                    .send_to(
                        session_id,
                        client_id,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
            }
        }
        ClientFrame::StatusUpdate { .. } => match state.manager.status(session_id).await {
            Ok(snapshot) => {
                state
                    .hub
                    .send_to(session_id, client_id, ServerEvent::SessionStatus { snapshot })
                    .await;
            }
            Err(e) => {
                state
                    .hub
                    .send_to(
                        session_id,
                        client_id,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
            }
        },
    }
}
