//! HTTP + WebSocket surface (§4.5, §6): one axum router serving the
//! device agent's REST calls and persistent socket, the TAN redemption
//! endpoint, the parent-portal socket, and a liveness probe.
//!
//! Endpoints:
//!   GET  /health
//!   POST /agent/heartbeat
//!   POST /agent/usage-event
//!   GET  /agent/rules/current
//!   POST /agent/tamper-alert
//!   GET  /agent/ws
//!   POST /tans/redeem
//!   GET  /portal/ws

pub mod agent;
pub mod auth;
pub mod portal;
pub mod routes;
pub mod tans;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/agent/heartbeat", post(agent::heartbeat))
        .route("/agent/usage-event", post(agent::usage_event))
        .route("/agent/rules/current", get(agent::current_rules))
        .route("/agent/tamper-alert", post(agent::tamper_alert))
        .route("/agent/ws", get(agent::ws_upgrade))
        .route("/tans/redeem", post(tans::redeem))
        .route("/portal/ws", get(portal::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
