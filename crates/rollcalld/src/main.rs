use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod dbus_interface;
mod engine;
mod recorder;

use attendance::AttendanceGates;
use config::Config;
use dbus_interface::RollcallService;
use rollcall_store::{EmbeddingCipher, Store};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load()?;

    let cipher = EmbeddingCipher::load_or_create(&config.key_path)?;
    tracing::info!(fingerprint = cipher.fingerprint(), "embedding key loaded");
    let key_fingerprint = cipher.fingerprint().to_string();

    let store = Store::open(&config.db_path, cipher).await?;
    let gallery = store.load_gallery().await?;
    tracing::info!(entries = gallery.len(), "gallery loaded");

    let (event_tx, event_rx) = mpsc::channel(64);
    let gates = AttendanceGates::new(
        Duration::from_secs(config.raw_log_interval_secs),
        Duration::from_secs(config.attendance_cooldown_secs),
        Duration::from_secs(config.unknown_alert_cooldown_secs),
    );
    let _recorder = recorder::spawn_recorder(store.clone(), gates, event_rx);

    let engine = engine::spawn_engine(&config, gallery, event_tx)?;

    let service = RollcallService {
        engine,
        store,
        frames_per_enroll: config.frames_per_enroll,
        camera_device: config.camera_device.clone(),
        key_fingerprint,
        started: Instant::now(),
    };

    let _conn = zbus::connection::Builder::system()?
        .name("org.rollcall.Rollcall1")?
        .serve_at("/org/rollcall/Rollcall1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
