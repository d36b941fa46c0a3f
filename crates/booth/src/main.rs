//! Photobooth Camera Process - Main Entry Point

use anyhow::Context;
use booth::{init_logging, AppConfig, Booth};
use capture_watcher::WatcherEvent;
use dcc_monitor::MonitorEvent;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.logging)?;

    info!("=== Photobooth camera layer v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Control server {}:{} (live view {}), captures in {}",
        config.client.host,
        config.client.api_port,
        config.client.live_view_port,
        config.watcher.root.display()
    );

    let mut booth = Booth::new(&config)?;
    booth.start().await?;

    let mut monitor_events = booth.monitor.subscribe();
    let monitor_log = tokio::spawn(async move {
        loop {
            match monitor_events.recv().await {
                Ok(MonitorEvent::RecoveryFailed { reason }) => {
                    error!("Camera control unavailable, manual retry required: {}", reason);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} monitor events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut watcher_events = booth.watcher.subscribe();
    let watcher_log = tokio::spawn(async move {
        loop {
            match watcher_events.recv().await {
                Ok(WatcherEvent::ImageCaptured(event)) => {
                    info!("Image captured: {} ({} bytes)", event.path.display(), event.size);
                }
                Ok(WatcherEvent::SessionCreated(path)) => {
                    info!("New session folder: {}", path.display());
                }
                Ok(WatcherEvent::Error(message)) => warn!("Watcher error: {}", message),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} watcher events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    booth.shutdown().await;
    monitor_log.abort();
    watcher_log.abort();

    Ok(())
}
