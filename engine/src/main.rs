use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use soundboard_engine::api::{build_router, AppState};
use soundboard_engine::audio::{
    describe_strategy, parse_volume_setting, select_backend, ProcessLauncher, SearchPath, Supervisor,
};
use soundboard_engine::config::Config;
use soundboard_engine::db::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let config = Config::from_env()?;

    let store = Store::open(config.db_path.clone())
        .await
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating {}", config.upload_dir.display()))?;

    // Probed once; a host without any player still serves the catalog.
    let backend = select_backend(&SearchPath::from_env(), config.player);
    if backend.is_available() {
        info!("audio backend: {}", describe_strategy(&backend));
    } else {
        warn!("no audio player found; playback requests will fail until one is installed");
    }

    let volume = parse_volume_setting(store.get_setting("volume").await?.as_deref());
    let supervisor = Supervisor::new(Arc::new(ProcessLauncher::new(backend)), volume);

    let state = AppState {
        version: version.clone(),
        store,
        supervisor: supervisor.clone(),
        upload_dir: config.upload_dir.clone(),
        ffprobe: config.ffprobe.clone(),
    };

    let public_dir = config.public_dir.is_dir().then_some(config.public_dir.as_path());
    if public_dir.is_none() {
        warn!("web client directory {} not found; serving the API only", config.public_dir.display());
    }
    let app = build_router(state, public_dir, config.max_upload_bytes);

    info!("Sound board engine v{version} starting on http://{}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // No player process may outlive the engine.
    let mut events = supervisor.subscribe();
    supervisor.stop().await;
    if supervisor.status().await.is_playing {
        let _ = tokio::time::timeout(Duration::from_secs(3), events.recv()).await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("sigterm handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
