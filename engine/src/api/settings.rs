use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::AppState;
use crate::audio::PlaybackMode;
use crate::error::{ApiError, ApiResult};

/// Only readable and writable through the PIN endpoints.
const PIN_CODE_KEY: &str = "pin_code";

fn setting_not_found() -> ApiError {
    ApiError::NotFound("Setting not found".to_string())
}

/// GET /api/settings
pub async fn list_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let settings: BTreeMap<String, String> = state
        .store
        .list_settings()
        .await?
        .into_iter()
        .filter(|s| s.key != PIN_CODE_KEY)
        .map(|s| (s.key, s.value))
        .collect();

    Ok(Json(json!({ "success": true, "settings": settings })))
}

/// GET /api/settings/:key
pub async fn get_setting(Path(key): Path<String>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    if key == PIN_CODE_KEY {
        return Err(setting_not_found());
    }
    let value = state.store.get_setting(&key).await?.ok_or_else(setting_not_found)?;
    Ok(Json(json!({ "success": true, "setting": { "key": key, "value": value } })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSetting {
    #[serde(default)]
    pub value: Value,
}

/// Settings are stored as text; clients may send strings, numbers or bools.
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Checks a value for a known key and returns its normalised form.
/// Unknown keys are stored as given.
pub fn validate_setting(key: &str, raw: &str) -> Result<String, String> {
    match key {
        "playback_mode" => raw
            .parse::<PlaybackMode>()
            .map(|m| m.as_str().to_string())
            .map_err(|_| "Invalid playback mode. Valid modes are: queue, interrupt, block".to_string()),
        "volume" => raw
            .parse::<i64>()
            .ok()
            .filter(|v| (0..=100).contains(v))
            .map(|v| v.to_string())
            .ok_or_else(|| "Volume must be a number between 0 and 100".to_string()),
        "max_file_size" => raw
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v.to_string())
            .ok_or_else(|| "max_file_size must be a positive number".to_string()),
        "pin_enabled" => match raw {
            "true" | "false" => Ok(raw.to_string()),
            _ => Err("pin_enabled must be true or false".to_string()),
        },
        PIN_CODE_KEY => Err("Use /api/pin/change to update the PIN".to_string()),
        _ => Ok(raw.to_string()),
    }
}

/// PUT /api/settings/:key
pub async fn put_setting(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<UpdateSetting>,
) -> ApiResult<Json<Value>> {
    let raw = value_as_text(&req.value).ok_or_else(|| ApiError::BadRequest("Value is required".to_string()))?;
    let value = validate_setting(&key, &raw).map_err(ApiError::BadRequest)?;

    state.store.put_setting(&key, &value).await?;

    if key == "volume" {
        if let Ok(volume) = value.parse::<i64>() {
            state.supervisor.set_volume(volume).await;
        }
    }

    info!("setting {key} = {value}");
    Ok(Json(json!({
        "success": true,
        "message": "Setting updated successfully",
        "setting": { "key": key, "value": value },
    })))
}
