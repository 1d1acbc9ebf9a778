//! TAN redemption endpoint (§4.2, §6, §8 scenario 3). A device redeems
//! a code on behalf of the child it belongs to; on success the child's
//! connected devices and the family's portal sockets are notified
//! immediately rather than waiting on the next poll.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{HeimdallError, HeimdallResult};
use crate::policy::tan;
use crate::rest::auth::{authenticate_device, device_token_header};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RedeemTanBody {
    pub code: String,
}

pub async fn redeem(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<RedeemTanBody>,
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
    let family = state
        .storage
        .get_family(family_id)
        .await?
        .ok_or(HeimdallError::NotFound("family"))?;

    let tan = tan::redeem(&state.storage, &body.code, &family.timezone).await?;
    let tan_id = Uuid::parse_str(&tan.id).map_err(|e| HeimdallError::Internal(e.into()))?;
    let tan_type: heimdall_types::enums::TanType =
        serde_json::from_value(serde_json::Value::String(tan.tan_type.clone()))
            .map_err(|e| HeimdallError::Internal(e.into()))?;

    crate::push::push_rules_to_child_devices(&state.storage, &state.cache, &state.registry, child_id).await?;
    crate::push::notify_tan_activated(&state.registry, child_id, tan_id, tan_type, tan.value_minutes, tan.expires_at);
    crate::push::notify_parent_dashboard(&state.registry, family_id, "tan_redeemed", Some(child_id));

    Ok(Json(json!({
        "id": tan.id,
        "tan_type": tan.tan_type,
        "value_minutes": tan.value_minutes,
        "value_unlock_until": tan.value_unlock_until,
        "expires_at": tan.expires_at,
        "status": tan.status,
    })))
}
