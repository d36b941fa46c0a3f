//! Photobooth Camera Process
//!
//! Wires the camera connectivity layer together:
//! - Layered configuration (defaults, TOML file, environment)
//! - Logging setup
//! - Startup and shutdown ordering of client, monitor, watcher and facade

use camera_service::{CameraService, ServiceConfig};
use capture_watcher::{CaptureWatcher, WatcherConfig};
use config::{Config, ConfigError, Environment, File, Map};
use dcc_client::{DccClient, DccClientConfig, DccError};
use dcc_monitor::{DccMonitor, MonitorConfig, MonitorError, TaskListProbe};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Prefix for environment overrides, e.g. `PHOTOBOOTH__CLIENT__API_PORT`
pub const ENV_PREFIX: &str = "PHOTOBOOTH";

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_NAME: &str = "photobooth";

/// Booth error types
#[derive(Debug, Error)]
pub enum BoothError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] DccError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: DccClientConfig,
    pub monitor: MonitorConfig,
    pub watcher: WatcherConfig,
    pub camera: ServiceConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Defaults, then the config file, then `PHOTOBOOTH__*` environment.
    ///
    /// An explicit `path` must exist; otherwise `photobooth.toml` in the
    /// working directory is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, BoothError> {
        Self::load_from(path, None)
    }

    /// `load` with `env` standing in for the process environment when given
    pub fn load_from(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, BoothError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), BoothError> {
    let level = Level::from_str(&config.level).unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
    };
    result.map_err(|e| BoothError::Logging(e.to_string()))
}

/// Running set of camera components
pub struct Booth {
    pub client: Arc<DccClient>,
    pub monitor: Arc<DccMonitor>,
    pub watcher: Arc<CaptureWatcher>,
    pub camera: Arc<CameraService>,
    monitor_guard: Option<JoinHandle<()>>,
}

impl Booth {
    /// Build every component; nothing runs until `start()`
    pub fn new(config: &AppConfig) -> Result<Self, BoothError> {
        let client = Arc::new(DccClient::new(config.client.clone())?);

        let process_probe = Arc::new(TaskListProbe::new(config.monitor.process_name.clone()));
        let monitor = Arc::new(
            DccMonitor::new(config.monitor.clone(), client.clone())
                .with_process_probe(process_probe),
        );

        let watcher = Arc::new(CaptureWatcher::new(config.watcher.clone()));
        let camera = Arc::new(CameraService::new(
            client.clone(),
            watcher.clone(),
            monitor.subscribe_status(),
            config.camera.clone(),
        ));

        Ok(Self {
            client,
            monitor,
            watcher,
            camera,
            monitor_guard: None,
        })
    }

    /// Start the monitor and watcher. A watcher failure is not fatal:
    /// captures then go through the folder scan.
    pub async fn start(&mut self) -> Result<(), BoothError> {
        let monitor_config = self.monitor.config();
        if !monitor_config.is_dcc_installed() {
            warn!(
                "Camera control application not found at {}",
                monitor_config.executable_path().display()
            );
        }

        self.monitor.start()?;

        if let Err(e) = self.watcher.start().await {
            warn!(
                "Capture watcher failed to start on {}: {}; captures will use folder scan",
                self.watcher.root().display(),
                e
            );
        }

        self.monitor_guard = Some(self.camera.spawn_monitor_guard(self.monitor.subscribe()));
        info!("Booth camera layer started");
        Ok(())
    }

    /// Stop everything in reverse order
    pub async fn shutdown(&mut self) {
        self.camera.disconnect().await;
        if let Some(guard) = self.monitor_guard.take() {
            guard.abort();
        }
        self.monitor.stop().await;
        self.watcher.stop().await;
        self.client.shutdown();
        info!("Booth camera layer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcc_monitor::MonitorState;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load_from(None, Some(Map::new())).unwrap();
        assert_eq!(config.client.api_port, 5513);
        assert_eq!(config.client.live_view_port, 5514);
        assert_eq!(config.monitor.health_check_interval_ms, 10_000);
        assert_eq!(config.camera.capture_timeout_ms, 15_000);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[monitor]\nmax_recovery_attempts = 3\n\n[camera]\nfreshness_ms = 5000\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path()), Some(Map::new())).unwrap();
        assert_eq!(config.monitor.max_recovery_attempts, 3);
        assert_eq!(config.monitor.initial_backoff_ms, 1_000);
        assert_eq!(config.camera.freshness_ms, 5_000);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(result, Err(BoothError::Config(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = Map::new();
        env.insert("PHOTOBOOTH__WATCHER__MAX_DEPTH".to_string(), "5".to_string());
        env.insert("PHOTOBOOTH__CLIENT__API_PORT".to_string(), "6613".to_string());
        env.insert("UNRELATED__CLIENT__API_PORT".to_string(), "1".to_string());

        let config = AppConfig::load_from(None, Some(env)).unwrap();
        assert_eq!(config.watcher.max_depth, 5);
        assert_eq!(config.client.api_port, 6613);
        assert_eq!(config.client.live_view_port, 5514);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            client: DccClientConfig {
                api_port: 1,
                live_view_port: 1,
                probe_timeout_ms: 200,
                ..Default::default()
            },
            watcher: WatcherConfig::with_root(dir.path().join("captures")),
            ..Default::default()
        };

        let mut booth = Booth::new(&config).unwrap();
        booth.start().await.unwrap();
        assert_ne!(booth.monitor.state(), MonitorState::Stopped);
        assert!(booth.watcher.is_running());

        booth.shutdown().await;
        assert_eq!(booth.monitor.state(), MonitorState::Stopped);
        assert!(!booth.watcher.is_running());
        assert!(booth.client.is_shut_down());
    }
}
