//! Device agent endpoints (§4.5, §6): heartbeat, usage ingestion,
//! current-rules poll, tamper alerts, and the persistent WebSocket.
//! Grounded in `original_source/backend/app/api/agent_routes.py`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use heimdall_types::ws::DeviceToServerMessage;

use futures_util::{SinkExt, StreamExt};

use crate::error::{HeimdallError, HeimdallResult};
use crate::policy::resolve_rules;
use crate::rest::auth::{authenticate_device, device_token_header};
use crate::AppState;

pub async fn heartbeat(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> HeimdallResult<Json<Value>> {
    let token = device_token_header(&headers)?;
    let device = authenticate_device(&state.storage, &token).await?;
    let device_id = Uuid::parse_str(&device.id).map_err(|e| HeimdallError::Internal(e.into()))?;
    state.storage.update_device_last_seen(device_id, Utc::now()).await?;
    Ok(Json(json!({ "status": "ok", "server_time": Utc::now() })))
}

#[derive(Debug, Deserialize)]
pub struct UsageEventBody {
    pub app_package: Option<String>,
    pub app_group_id: Option<Uuid>,
    pub event_type: String,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub ended_at: Option<chrono::DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

pub async fn usage_event(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<UsageEventBody>,
) -> HeimdallResult<Json<Value>> {
    let token = device_token_header(&headers)?;
    let device = authenticate_device(&state.storage, &token).await?;
    let device_id = Uuid::parse_str(&device.id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let child_id = Uuid::parse_str(&device.child_id).map_err(|e| HeimdallError::Internal(e.into()))?;

    let id = state
        .storage
        .insert_usage_event(
            device_id,
            child_id,
            body.app_package.as_deref(),
            body.app_group_id,
            &body.event_type,
            body.started_at,
            body.ended_at,
            body.duration_seconds,
            Utc::now(),
        )
        .await?;

    Ok(Json(json!({ "id": id, "status": "recorded" })))
}

pub async fn current_rules(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> HeimdallResult<Json<Value>> {
    let token = device_token_header(&headers)?;
    let device = authenticate_device(&state.storage, &token).await?;
    let device_id = Uuid::parse_str(&device.id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let rules = resolve_rules(&state.storage, &state.cache, device_id, false).await?;
    Ok(Json(serde_json::to_value(rules).map_err(|e| HeimdallError::Internal(e.into()))?))
}

#[derive(Debug, Deserialize)]
pub struct TamperAlertBody {
    pub timestamp: chrono::DateTime<Utc>,
    pub reason: String,
}

/// Logs the alert and notifies the parent portal; the spec has no
/// dedicated storage table for tamper events, so this is a push-only
/// side effect rather than a persisted record (§4.5 "Tamper alerts").
pub async fn tamper_alert(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<TamperAlertBody>,
) -> HeimdallResult<Json<Value>> {
    let token = device_token_header(&headers)?;
    let device = authenticate_device(&state.storage, &token).await?;
    let child_id = Uuid::parse_str(&device.child_id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let user = state
        .storage
        .get_user(child_id)
        .await?
        .ok_or(HeimdallError::NotFound("child"))?;
    let family_id = Uuid::parse_str(&user.family_id).map_err(|e| HeimdallError::Internal(e.into()))?;

    tracing::warn!(device_id = %device.id, timestamp = %body.timestamp, reason = %body.reason, "tamper alert");
    crate::push::notify_parent_event(
        &state.registry,
        family_id,
        "Tamper alert",
        &body.reason,
        heimdall_types::ws::NotificationCategory::Device,
        Some(child_id.into()),
    );
    Ok(Json(json!({ "status": "received" })))
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handshake: the first text frame on a fresh socket is the raw device
/// token (not a tagged [`DeviceToServerMessage`]). Anything else closes
/// with code 4001. Once authenticated, every subsequent frame is a
/// tagged message (§4.5 "WebSocket protocol").
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let token = match socket.recv().await {
        Some(Ok(Message::Text(t))) => t.to_string(),
        _ => {
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 4001,
                    reason: "expected token".into(),
                })))
                .await;
            return;
        }
    };

    let device = match authenticate_device(&state.storage, &token).await {
        Ok(d) => d,
        Err(_) => {
            let _ = socket
                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: 4001,
                    reason: "invalid token".into(),
                })))
                .await;
            return;
        }
    };
    let Ok(device_id) = Uuid::parse_str(&device.id) else {
        return;
    };
    let Ok(child_id) = Uuid::parse_str(&device.child_id) else {
        return;
    };

    let auth_ok = heimdall_types::ws::ServerToDeviceMessage::AuthOk {
        device_id: device_id.into(),
    };
    let Ok(payload) = serde_json::to_string(&auth_ok) else {
        return;
    };
    if socket.send(Message::Text(payload.into())).await.is_err() {
        return;
    }

    let (mut outbox, sender) = state.registry.connect(device_id, child_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                match outgoing {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_device_frame(&state, device_id, child_id, &text, &mut sink).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.disconnect(device_id, child_id, &sender);
}

async fn handle_device_frame(
    state: &AppState,
    device_id: Uuid,
    child_id: Uuid,
    text: &str,
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
) {
    let parsed: Result<DeviceToServerMessage, _> = serde_json::from_str(text);
    let reply = match parsed {
        Ok(DeviceToServerMessage::Ping) => {
            heimdall_types::ws::ServerToDeviceMessage::Pong { server_time: Utc::now() }
        }
        Ok(DeviceToServerMessage::Heartbeat) => {
            let _ = state.storage.update_device_last_seen(device_id, Utc::now()).await;
            heimdall_types::ws::ServerToDeviceMessage::HeartbeatAck
        }
        Ok(DeviceToServerMessage::UsageUpdate {
            app_package,
            app_group_id,
            duration_seconds,
        }) => {
            let _ = state
                .storage
                .insert_usage_event(
                    device_id,
                    child_id,
                    app_package.as_deref(),
                    app_group_id.map(|g| g.as_uuid()),
                    "update",
                    None,
                    None,
                    Some(duration_seconds),
                    Utc::now(),
                )
                .await;
            heimdall_types::ws::ServerToDeviceMessage::Ack {
                received_type: Some("usage_update".to_string()),
            }
        }
        Err(_) => {
            let received_type = serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
            heimdall_types::ws::ServerToDeviceMessage::Ack { received_type }
        }
    };

    if let Ok(payload) = serde_json::to_string(&reply) {
        let _ = sink.send(Message::Text(payload.into())).await;
    }
}
