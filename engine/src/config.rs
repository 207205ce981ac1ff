use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

use crate::audio::BackendKind;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

// --- Engine configuration ------------------------------------------------
//
// Everything comes from environment variables so the service can be dropped
// onto a Pi with a systemd unit and nothing else:
//
//   SOUNDBOARD_BIND           listen address (default 0.0.0.0:3000)
//   SOUNDBOARD_DB_PATH        SQLite file (default ./data/sounds.db)
//   SOUNDBOARD_UPLOAD_DIR     where uploaded clips are stored (default ./uploads)
//   SOUNDBOARD_PUBLIC_DIR     static web client (default ./public)
//   SOUNDBOARD_MAX_FILE_SIZE  request body cap for uploads, in bytes
//   SOUNDBOARD_PLAYER         force a backend (mpv, ffplay, cvlc, sox, mpg123,
//                             pipeline, aplay, none)
//   SOUNDBOARD_FFPROBE        ffprobe binary used to read clip durations
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub player: Option<BackendKind>,
    pub ffprobe: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = var("SOUNDBOARD_BIND")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("SOUNDBOARD_BIND is not a socket address")?;

        let max_upload_bytes = match var("SOUNDBOARD_MAX_FILE_SIZE") {
            Some(v) => v
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("SOUNDBOARD_MAX_FILE_SIZE must be a positive integer, got {v:?}"))?,
            None => DEFAULT_MAX_FILE_SIZE,
        };

        let player = match var("SOUNDBOARD_PLAYER") {
            Some(v) => Some(v.parse::<BackendKind>().with_context(|| format!("SOUNDBOARD_PLAYER={v}"))?),
            None => None,
        };

        Ok(Self {
            bind,
            db_path: var("SOUNDBOARD_DB_PATH")
                .unwrap_or_else(|| "./data/sounds.db".to_string())
                .into(),
            upload_dir: var("SOUNDBOARD_UPLOAD_DIR")
                .unwrap_or_else(|| "./uploads".to_string())
                .into(),
            public_dir: var("SOUNDBOARD_PUBLIC_DIR")
                .unwrap_or_else(|| "./public".to_string())
                .into(),
            max_upload_bytes,
            player,
            ffprobe: var("SOUNDBOARD_FFPROBE").unwrap_or_else(|| "ffprobe".to_string()),
        })
    }
}
