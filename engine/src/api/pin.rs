use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::AppState;
use crate::error::{ApiError, ApiResult};

// Stored in the settings table; the seed PIN is 1234.
const DEFAULT_PIN: &str = "1234";

async fn stored_pin(state: &AppState) -> ApiResult<String> {
    Ok(state
        .store
        .get_setting("pin_code")
        .await?
        .unwrap_or_else(|| DEFAULT_PIN.to_string()))
}

/// 4 to 6 ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    (4..=6).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit())
}

/// GET /api/pin/enabled
pub async fn enabled(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let enabled = state.store.get_setting("pin_enabled").await?.as_deref() == Some("true");
    Ok(Json(json!({ "success": true, "enabled": enabled })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub pin: Option<String>,
}

/// POST /api/pin/verify
pub async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> ApiResult<Json<Value>> {
    let pin = req
        .pin
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("PIN is required".to_string()))?;

    if pin != stored_pin(&state).await? {
        warn!("rejected PIN attempt");
        return Err(ApiError::Unauthorized("Invalid PIN".to_string()));
    }

    Ok(Json(json!({ "success": true, "message": "PIN verified" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    #[serde(default)]
    pub current_pin: Option<String>,
    #[serde(default)]
    pub new_pin: Option<String>,
}

/// POST /api/pin/change
pub async fn change(State(state): State<AppState>, Json(req): Json<ChangeRequest>) -> ApiResult<Json<Value>> {
    let (Some(current), Some(new_pin)) = (
        req.current_pin.filter(|p| !p.is_empty()),
        req.new_pin.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Current PIN and new PIN are required".to_string(),
        ));
    };

    if !is_valid_pin(&new_pin) {
        return Err(ApiError::BadRequest("PIN must be 4-6 digits".to_string()));
    }

    if current != stored_pin(&state).await? {
        return Err(ApiError::Unauthorized("Current PIN is incorrect".to_string()));
    }

    state.store.put_setting("pin_code", &new_pin).await?;
    info!("PIN changed");
    Ok(Json(json!({ "success": true, "message": "PIN changed successfully" })))
}
