// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket handler for dispatch clients.
//!
//! Grounded on `coopmux::transport::ws::{ws_handler, handle_ws}`: one
//! connection, one task, one `tokio::select!` loop pairing the session's
//! outbound queue against the socket halves. The teacher's bridge/upstream
//! split doesn't apply here — there is no upstream to proxy — so this
//! dispatches straight into the `SessionHub`/handler registry instead.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth;
use crate::config::DispatchConfig;
use crate::model::{Message, Role};

use super::{Session, SessionHub};

/// Shared state the WS upgrade route needs.
#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<SessionHub>,
    pub config: Arc<DispatchConfig>,
}

/// Query parameters for the dispatch WS upgrade. The HTTP handshake layer
/// that issues `id`/`role`/`token` is out of scope (spec §6) — this accepts
/// them as plain query params the way a reverse proxy would forward them.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchWsQuery {
    pub id: String,
    #[serde(default)]
    pub role: Role,
    pub token: Option<String>,
}

/// `GET /ws/session` — WebSocket upgrade for a dispatch client.
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<DispatchWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(err) = auth::validate_token(query.token.as_deref(), state.config.auth_token.as_deref()) {
        return err.to_http_response("unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state.hub, state.config, query.id, query.role))
}

/// Per-connection WebSocket handler: one read/write loop per session.
async fn handle_ws(
    socket: WebSocket,
    hub: Arc<SessionHub>,
    config: Arc<DispatchConfig>,
    id: String,
    role: Role,
) {
    let (session, mut outbox) = Session::new(id, role);
    hub.register(Arc::clone(&session)).await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let cancel = session.cancellation();
    let mut ping_timer = tokio::time::interval(config.ping_period());
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; the connection is already alive.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            // Hub -> client.
            msg = outbox.recv() => {
                match msg {
                    Some(msg) => {
                        let Ok(text) = serde_json::to_string(&msg) else { continue };
                        let send = ws_tx.send(WsMessage::Text(text.into()));
                        if tokio::time::timeout(config.write_wait(), send).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Keepalive ping, server-initiated (spec §4.1 ping/pong deadlines).
            _ = ping_timer.tick() => {
                let send = ws_tx.send(WsMessage::Ping(Vec::new().into()));
                if tokio::time::timeout(config.write_wait(), send).await.is_err() {
                    break;
                }
            }

            // Client -> hub, bounded by the pong-wait deadline.
            frame = tokio::time::timeout(config.pong_wait(), ws_rx.next()) => {
                let Ok(frame) = frame else {
                    tracing::debug!(session_id = %session.id, "pong wait elapsed, closing session");
                    break;
                };
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > config.max_frame_bytes {
                            tracing::debug!(session_id = %session.id, "frame exceeds max size, dropping");
                            continue;
                        }
                        match serde_json::from_str::<Message>(&text) {
                            Ok(mut inbound) => {
                                inbound.user_id = Some(session.id.clone());
                                hub.dispatch(Arc::clone(&session), inbound).await;
                            }
                            Err(err) => tracing::debug!(session_id = %session.id, %err, "failed to decode inbound message"),
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    hub.unregister(&session).await;
}
