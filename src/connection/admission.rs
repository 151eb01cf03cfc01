//! Admission Controller (§4.1, §4.2): token issuance and the WebSocket
//! upgrade. Grounded on the teacher's `websocket_handler`/`handle_socket`
//! split in `websocket/handler.rs` — query-param-free here since the
//! connection token travels in the `Origin` header per §6, but the same
//! split-socket, spawn-and-select task shape is kept for the read/write
//! loops.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

use super::dispatcher::MessageContext;
use super::heartbeat;
use super::record::ConnectionRecord;
use super::store::ConnectionTokenRecord;

/// POST `/` — §4.1.
pub async fn issue_token(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::Request("No token provided.".into()))?;

    let verification = state.identity.verify_identity(&token).await;
    if !verification.ok {
        warn!(remote_addr = %remote, "identity verification failed");
        debug!(raw_token = %token, "rejected identity token");
        return Err(AppError::Auth(
            verification
                .reason
                .unwrap_or_else(|| "Identity verification failed.".into()),
        ));
    }
    let client_id = verification.client_id.expect("accepted verification carries a client id");
    debug!(raw_token = %token, %client_id, "verified identity token");

    let now = Utc::now();
    if let Some(existing) = state.registry.find_by_client_id(&client_id).await? {
        if existing.blocks_new_issuance(now) {
            return Err(AppError::Request(format!(
                "client '{client_id}' already has an open connection ('{}')",
                existing.id
            )));
        }
        state.registry.delete_by_id(existing.id).await?;
        if let Some(token_id) = existing.token_id {
            state.registry.delete_token(token_id).await?;
        }
    }

    let id = Uuid::new_v4();
    let issued = state
        .token_broker
        .issue(id, state.config.report_url())
        .await;

    let record = ConnectionRecord::issued(
        id,
        client_id,
        remote.to_string(),
        state.config.report_url(),
        issued.token_id,
        issued.expires,
    );
    state.registry.upsert(&record).await?;
    state
        .registry
        .insert_token(&ConnectionTokenRecord {
            token_id: issued.token_id,
            connection_id: id,
            expires: issued.expires,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "state": "success", "token": issued.token })),
    )
        .into_response())
}

/// GET/WS `/connect` — §4.2.
pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(origin) = headers.get("Origin").and_then(|v| v.to_str().ok()) else {
        warn!(remote_addr = %remote, "connect attempt with no Origin header");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let origin = origin.to_string();

    ws.on_upgrade(move |socket| handle_upgrade(socket, state, remote, origin))
}

async fn handle_upgrade(socket: WebSocket, state: AppState, remote: SocketAddr, origin: String) {
    let verification = state.token_broker.verify(&origin).await;
    debug!(raw_token = %origin, "verifying connection token");
    if !verification.ok {
        warn!(remote_addr = %remote, reason = ?verification.reason, "rejecting connect upgrade");
        let _ = socket.close().await;
        return;
    }
    let connection_id = verification
        .subject
        .expect("a successful verification always carries a subject");

    let Ok(Some(mut record)) = state.registry.find_by_id(connection_id).await else {
        warn!(%connection_id, "connect token verified but no matching record");
        let _ = socket.close().await;
        return;
    };

    record.promote(
        state.config.server_id.to_string(),
        remote.to_string(),
        Utc::now(),
    );
    if state.registry.upsert(&record).await.is_err() {
        let _ = socket.close().await;
        return;
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.registry.register_socket(connection_id, tx);

    state
        .event_bus
        .emit_authenticate(&mut record, connection_id)
        .await;

    let heartbeat_handle = heartbeat::spawn(
        state.registry.clone(),
        connection_id,
        state.config.heartbeat_interval_ms,
    );
    state
        .registry
        .register_heartbeat(connection_id, heartbeat_handle);

    let promotion = json!({ "type": "connection.state", "state": "accepted" }).to_string();
    if ws_sender.send(Message::Text(promotion.into())).await.is_err() {
        super::lifecycle::cleanup(&state, connection_id, true).await;
        return;
    }

    state.event_bus.emit_connect(connection_id).await;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let state_for_recv = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => {
                    handle_text_frame(&state_for_recv, connection_id, &text).await;
                }
                Message::Pong(_) => {
                    heartbeat::record_pong(&state_for_recv.registry, connection_id).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    super::lifecycle::cleanup(&state, connection_id, true).await;
}

async fn handle_text_frame(state: &AppState, connection_id: Uuid, text: &str) {
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            warn!(%connection_id, "dropping frame that is not valid JSON");
            return;
        }
    };
    let Some(raw_type) = parsed.get("type").and_then(|v| v.as_str()) else {
        warn!(%connection_id, "dropping frame with no string type field");
        return;
    };

    let ctx = MessageContext {
        connection_id,
        registry: state.registry.clone(),
        sender: state.sender.clone(),
    };
    state.dispatcher.dispatch(&ctx, raw_type, &parsed).await;
}
