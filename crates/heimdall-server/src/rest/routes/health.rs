//! Liveness probe (no auth). Grounded in the reference daemon's own
//! `/api/v1/health` route, trimmed to what this server actually tracks.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = state.storage.pool().acquire().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
