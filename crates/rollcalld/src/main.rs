use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::{AttendanceService, StatusInfo};
use engine::EnginePolicies;
use rollcall_store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    let key = match &config.key_path {
        Some(path) => Some(read_sealing_key(path)?),
        None => None,
    };

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path, key)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    tracing::info!(
        db = %config.db_path.display(),
        sealed = key.is_some(),
        "database opened"
    );

    // No in-daemon extractor: callers submit pre-extracted embeddings.
    // Deployments that run the model next to the daemon plug it in here.
    let engine = engine::spawn_engine(
        store,
        None,
        EnginePolicies {
            matching: config.match_policy(),
            enrollment: config.enroll_policy(),
            cooldown: config.cooldown_policy(),
        },
    );

    let service = AttendanceService::new(
        engine,
        std::time::Duration::from_secs(config.verify_timeout_secs),
        StatusInfo {
            db_path: config.db_path.display().to_string(),
            sealed_templates: key.is_some(),
            match_threshold: config.match_threshold,
            min_samples: config.min_samples,
            cooldown: config.cooldown_label(),
        },
    );

    let _conn = zbus::connection::Builder::system()
        .context("connecting to the system bus")?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await
        .context("claiming the bus name")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}

/// Read the 32-byte template sealing key.
fn read_sealing_key(path: &Path) -> Result<[u8; 32]> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading sealing key {}", path.display()))?;
    bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "sealing key {} must be exactly 32 bytes, found {}",
            path.display(),
            bytes.len()
        )
    })
}
