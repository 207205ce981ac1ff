//! HTTP surface: clip catalog, playback control, settings and the PIN gate.

pub mod pin;
pub mod settings;
pub mod sounds;

use std::path::{Path, PathBuf};

use axum::{extract::DefaultBodyLimit, extract::State, routing::get, Json, Router};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::audio::Supervisor;
use crate::db::Store;

/// Room for multipart framing on top of the largest accepted clip.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub store: Store,
    pub supervisor: Supervisor,
    pub upload_dir: PathBuf,
    pub ffprobe: String,
}

/// `public_dir` is served as the fallback when present. `max_upload_bytes`
/// is a hard cap on request bodies; the `max_file_size` setting is checked
/// per upload below it.
pub fn build_router(state: AppState, public_dir: Option<&Path>, max_upload_bytes: u64) -> Router {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/sounds", get(sounds::list_sounds))
        .route("/sounds/upload", axum::routing::post(sounds::upload_sound))
        .route("/sounds/stop", axum::routing::post(sounds::stop))
        .route("/sounds/status/current", get(sounds::current_status))
        .route(
            "/sounds/:id",
            get(sounds::get_sound)
                .patch(sounds::rename_sound)
                .delete(sounds::delete_sound),
        )
        .route("/sounds/:id/play", axum::routing::post(sounds::play_sound))
        .route("/settings", get(settings::list_settings))
        .route("/settings/:key", get(settings::get_setting).put(settings::put_setting))
        .route("/pin/enabled", get(pin::enabled))
        .route("/pin/verify", axum::routing::post(pin::verify))
        .route("/pin/change", axum::routing::post(pin::change));

    let mut app = Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http())
}

async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "Sound board API",
        "version": state.version,
        "endpoints": {
            "sounds": "/api/sounds",
            "settings": "/api/settings",
            "pin": "/api/pin",
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": timestamp,
        "version": state.version,
        "player": state.supervisor.backend().kind,
    }))
}
