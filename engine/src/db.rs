use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

// --- Persistence (SQLite) -------------------------------------------------
//
// Two tables: the clip catalog and a flat key/value settings table. The
// playback core never touches either; handlers read settings right before
// each play call.
//
// rusqlite is synchronous, so every call opens a short-lived connection on
// the blocking pool.

/// Seeded with INSERT OR IGNORE so operator changes survive restarts.
pub const DEFAULT_SETTINGS: [(&str, &str); 5] = [
    ("playback_mode", "queue"),
    ("max_file_size", "10485760"),
    ("volume", "80"),
    ("pin_enabled", "false"),
    ("pin_code", "1234"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sound {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub duration: Option<f64>,
    pub uploaded_at: String,
}

/// Everything needed to catalog a freshly stored upload.
#[derive(Debug, Clone)]
pub struct NewSound {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub file_path: String,
    pub mime_type: String,
    pub file_size: i64,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

fn db_init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        CREATE TABLE IF NOT EXISTS sounds (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            filename    TEXT NOT NULL UNIQUE,
            file_path   TEXT NOT NULL,
            mime_type   TEXT NOT NULL,
            file_size   INTEGER NOT NULL,
            duration    REAL,
            uploaded_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    for (key, value) in DEFAULT_SETTINGS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

const SOUND_COLUMNS: &str =
    "id, name, filename, file_path, mime_type, file_size, duration, uploaded_at";

fn sound_from_row(row: &Row<'_>) -> rusqlite::Result<Sound> {
    Ok(Sound {
        id: row.get(0)?,
        name: row.get(1)?,
        filename: row.get(2)?,
        file_path: row.get(3)?,
        mime_type: row.get(4)?,
        file_size: row.get(5)?,
        duration: row.get(6)?,
        uploaded_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
    })
}

fn db_get_sound(conn: &Connection, id: &str) -> rusqlite::Result<Option<Sound>> {
    conn.query_row(
        &format!("SELECT {SOUND_COLUMNS} FROM sounds WHERE id = ?1"),
        params![id],
        sound_from_row,
    )
    .optional()
}

/// Handle to the database file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Creates the parent directory and the schema if needed.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let store = Self { path };
        store.run(|conn| Ok(db_init(conn)?)).await?;
        Ok(store)
    }

    async fn run<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let mut conn = Connection::open(&path)
                .with_context(|| format!("opening database {}", path.display()))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            f(&mut conn)
        })
        .await
        .context("database task panicked")?
    }

    /// Newest first.
    pub async fn list_sounds(&self) -> anyhow::Result<Vec<Sound>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SOUND_COLUMNS} FROM sounds ORDER BY uploaded_at DESC, rowid DESC"
            ))?;
            let sounds = stmt
                .query_map([], sound_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sounds)
        })
        .await
    }

    pub async fn get_sound(&self, id: &str) -> anyhow::Result<Option<Sound>> {
        let id = id.to_string();
        self.run(move |conn| Ok(db_get_sound(conn, &id)?)).await
    }

    pub async fn insert_sound(&self, sound: NewSound) -> anyhow::Result<Sound> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sounds (id, name, filename, file_path, mime_type, file_size, duration, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
                params![
                    sound.id,
                    sound.name,
                    sound.filename,
                    sound.file_path,
                    sound.mime_type,
                    sound.file_size,
                    sound.duration
                ],
            )?;
            db_get_sound(conn, &sound.id)?
                .with_context(|| format!("sound {} vanished after insert", sound.id))
        })
        .await
    }

    /// Returns the updated row, or `None` if the id is unknown.
    pub async fn rename_sound(&self, id: &str, name: &str) -> anyhow::Result<Option<Sound>> {
        let (id, name) = (id.to_string(), name.to_string());
        self.run(move |conn| {
            let changed = conn.execute("UPDATE sounds SET name = ?1 WHERE id = ?2", params![name, id])?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(db_get_sound(conn, &id)?)
        })
        .await
    }

    /// Returns the removed row so the caller can delete the stored file.
    pub async fn delete_sound(&self, id: &str) -> anyhow::Result<Option<Sound>> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let sound = db_get_sound(&tx, &id)?;
            if sound.is_some() {
                tx.execute("DELETE FROM sounds WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(sound)
        })
        .await
    }

    pub async fn list_settings(&self) -> anyhow::Result<Vec<Setting>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let settings = stmt
                .query_map([], |row| {
                    Ok(Setting {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(settings)
        })
        .await
    }

    pub async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        let key = key.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?)
        })
        .await
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}
