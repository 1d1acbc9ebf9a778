//! Device-token authentication (§4.5 "Authentication"). Grounded in the
//! reference daemon's `ipc/auth.rs::validate_bearer` constant-time
//! token check, adapted to a hashed-at-rest token looked up by row.

use sha2::{Digest, Sha256};

use crate::error::HeimdallError;
use crate::storage::{DeviceRow, Storage};

/// Pulls the raw device token out of the `X-Device-Token` header (§6
/// "HTTP API"), shared by every device-authenticated REST route.
pub fn device_token_header(headers: &axum::http::HeaderMap) -> Result<String, HeimdallError> {
    headers
        .get("X-Device-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(HeimdallError::Unauthorized)
}

pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Looks up the device behind a raw bearer token, requiring `status =
/// active`. Used by both the REST middleware and the WebSocket
/// handshake's first frame.
pub async fn authenticate_device(
    storage: &Storage,
    raw_token: &str,
) -> Result<DeviceRow, HeimdallError> {
    let hash = hash_token(raw_token);
    let device = storage
        .get_device_by_token_hash(&hash)
        .await?
        .ok_or(HeimdallError::Unauthorized)?;
    if device.status != "active" {
        return Err(HeimdallError::Unauthorized);
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_hex() {
        let a = hash_token("abc123");
        let b = hash_token("abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
