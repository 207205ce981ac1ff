use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use crate::audio::{parse_volume_setting, PlaybackMode, PlaybackRequest};
use crate::config::DEFAULT_MAX_FILE_SIZE;
use crate::db::{NewSound, Store};
use crate::error::{ApiError, ApiResult};

pub const ALLOWED_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".m4a", ".aac", ".flac", ".webm"];

pub const ALLOWED_MIME_TYPES: [&str; 10] = [
    "audio/mpeg",
    "audio/wav",
    "audio/wave",
    "audio/x-wav",
    "audio/ogg",
    "audio/mp4",
    "audio/x-m4a",
    "audio/aac",
    "audio/flac",
    "audio/webm",
];

fn sound_not_found() -> ApiError {
    ApiError::NotFound("Sound not found".to_string())
}

/// GET /api/sounds
pub async fn list_sounds(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sounds = state.store.list_sounds().await?;
    Ok(Json(json!({ "success": true, "sounds": sounds })))
}

/// GET /api/sounds/:id
pub async fn get_sound(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sound = state.store.get_sound(&id).await?.ok_or_else(sound_not_found)?;
    Ok(Json(json!({ "success": true, "sound": sound })))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// PATCH /api/sounds/:id
pub async fn rename_sound(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Value>> {
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Name is required".to_string()))?;

    let sound = state
        .store
        .rename_sound(&id, name)
        .await?
        .ok_or_else(sound_not_found)?;

    Ok(Json(json!({
        "success": true,
        "message": "Sound renamed successfully",
        "sound": sound,
    })))
}

/// DELETE /api/sounds/:id
///
/// The row goes first; a stored file that is already gone is not an error.
pub async fn delete_sound(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sound = state.store.delete_sound(&id).await?.ok_or_else(sound_not_found)?;

    match tokio::fs::remove_file(&sound.file_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {e}", sound.file_path),
    }

    info!("deleted sound {} ({})", sound.id, sound.name);
    Ok(Json(json!({ "success": true, "message": "Sound deleted successfully" })))
}

// --- Upload ----------------------------------------------------------------

struct UploadedFile {
    original_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

/// Lowercased extension including the dot, if it is one we accept.
pub fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = FsPath::new(file_name).extension()?.to_str()?;
    let ext = format!(".{}", ext.to_ascii_lowercase());
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime.trim().to_ascii_lowercase().as_str())
}

fn validate_upload(file: &UploadedFile, max_bytes: u64) -> ApiResult<String> {
    let ext = allowed_extension(&file.original_name).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Invalid file type. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })?;

    if !is_allowed_mime(&file.mime_type) {
        return Err(ApiError::BadRequest(
            "Invalid MIME type. File must be an audio file.".to_string(),
        ));
    }

    if file.bytes.len() as u64 > max_bytes {
        return Err(ApiError::BadRequest(format!(
            "File size too large. Maximum size is {}.",
            human_size(max_bytes)
        )));
    }

    Ok(ext)
}

fn human_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else {
        format!("{bytes} bytes")
    }
}

/// Best-effort clip length via ffprobe; `None` when it is missing or unsure.
async fn probe_duration_seconds(ffprobe: &str, path: &FsPath) -> Option<f64> {
    let out = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;

    if !out.status.success() {
        return None;
    }

    let secs: f64 = String::from_utf8_lossy(&out.stdout).trim().parse().ok()?;
    (secs.is_finite() && secs > 0.0).then_some(secs)
}

async fn max_file_size(store: &Store) -> u64 {
    read_setting(store, "max_file_size")
        .await
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_FILE_SIZE)
}

/// POST /api/sounds/upload (multipart: `sound` file, optional `name`)
pub async fn upload_sound(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut file: Option<UploadedFile> = None;
    let mut name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse upload: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "sound" => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?
                    .to_vec();
                file = Some(UploadedFile {
                    original_name,
                    mime_type,
                    bytes,
                });
            }
            "name" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read name: {e}")))?;
                name = Some(text);
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    let ext = validate_upload(&file, max_file_size(&state.store).await)?;

    let id = Uuid::new_v4().to_string();
    let filename = format!("{}{ext}", Uuid::new_v4());
    let stored = state.upload_dir.join(&filename);
    tokio::fs::write(&stored, &file.bytes).await?;

    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| {
            FsPath::new(&file.original_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| filename.clone())
        });

    let duration = probe_duration_seconds(&state.ffprobe, &stored).await;

    let new_sound = NewSound {
        id,
        name,
        filename,
        file_path: stored.display().to_string(),
        mime_type: file.mime_type,
        file_size: file.bytes.len() as i64,
        duration,
    };

    let sound = match state.store.insert_sound(new_sound).await {
        Ok(sound) => sound,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&stored).await {
                warn!("could not remove {} after failed insert: {rm}", stored.display());
            }
            return Err(e.into());
        }
    };

    info!("uploaded sound {} ({}, {} bytes)", sound.id, sound.name, sound.file_size);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Sound uploaded successfully",
            "sound": sound,
        })),
    ))
}

// --- Playback --------------------------------------------------------------

/// Settings reads feeding playback never fail the request.
async fn read_setting(store: &Store, key: &str) -> Option<String> {
    match store.get_setting(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("could not read setting {key}: {e:#}");
            None
        }
    }
}

/// POST /api/sounds/:id/play
///
/// Responds once playback has started (or the clip was queued), not when
/// the clip ends.
pub async fn play_sound(Path(id): Path<String>, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sound = state.store.get_sound(&id).await?.ok_or_else(sound_not_found)?;

    let mode = PlaybackMode::from_setting(read_setting(&state.store, "playback_mode").await.as_deref());
    let volume = parse_volume_setting(read_setting(&state.store, "volume").await.as_deref());

    state
        .supervisor
        .play(PlaybackRequest::new(sound.file_path, mode, i64::from(volume)))
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Sound is playing (mode: {mode})"),
        "playbackMode": mode,
    })))
}

/// POST /api/sounds/stop
pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.supervisor.stop().await;
    Json(json!({ "success": true, "message": "Playback stopped" }))
}

/// GET /api/sounds/status/current
pub async fn current_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.supervisor.status().await;
    Json(json!({ "success": true, "status": status }))
}
