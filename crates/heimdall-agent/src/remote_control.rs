//! Loopback HTTP surface for `--remote-control`/`--remote-port` (§6
//! "CLI (agent)"): lets test harnesses and scripted demos drive the
//! process monitor and TOTP unlock without a real foreground window or
//! a live TOTP authenticator. Always bound to 127.0.0.1.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use heimdall_types::TotpMode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::orchestrator::{Orchestrator, TrayState};

pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/simulate", post(simulate))
        .route("/tray", get(tray))
        .route("/unlock", post(unlock))
        .with_state(orchestrator)
}

#[derive(Debug, Deserialize)]
struct SimulateBody {
    executable: Option<String>,
    window_title: Option<String>,
    #[serde(default)]
    pid: u32,
}

async fn simulate(State(orchestrator): State<Arc<Orchestrator>>, Json(body): Json<SimulateBody>) -> Json<Value> {
    orchestrator
        .monitor()
        .set_simulation(body.executable.as_deref(), body.window_title.as_deref(), body.pid);
    Json(json!({ "status": "ok" }))
}

async fn tray(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Value> {
    let state = match orchestrator.tray_state() {
        TrayState::Blocked => "blocked",
        TrayState::Warning => "warning",
        TrayState::Connected => "connected",
        TrayState::Offline => "offline",
    };
    Json(json!({ "state": state }))
}

#[derive(Debug, Deserialize)]
struct UnlockBody {
    code: String,
    mode: TotpMode,
}

async fn unlock(State(orchestrator): State<Arc<Orchestrator>>, Json(body): Json<UnlockBody>) -> Json<Value> {
    let unlocked = orchestrator.totp_unlock(&body.code, body.mode);
    Json(json!({ "unlocked": unlocked }))
}
