//! WebSocket event channel: one connection streams a user's typed events
//! as JSON text frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// `GET /ws?token=...` — authenticate, upgrade, stream events.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, state))
}

async fn handle_socket(mut socket: WebSocket, token: String, state: Arc<AppState>) {
    let Some((username, record)) = state.users.authenticate(&token) else {
        warn!("ws connection with invalid token");
        let _ = socket
            .send(Message::Text(
                serde_json::json!({"error": "无效的访问令牌"}).to_string().into(),
            ))
            .await;
        return;
    };

    let user_id = record.user_id.to_string();
    let mut events = state.engine.bus.subscribe(&user_id);
    info!(user = %username, "ws client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ev) => {
                        let Ok(text) = serde_json::to_string(&ev) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Slow consumer: skip the backlog, keep streaming.
                        debug!(user = %username, skipped = n, "ws consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {} // inbound frames are ignored; this channel is one-way
                    Some(Err(e)) => {
                        debug!(user = %username, error = %e, "ws receive error");
                        break;
                    }
                }
            }
        }
    }
    info!(user = %username, "ws client disconnected");
}
