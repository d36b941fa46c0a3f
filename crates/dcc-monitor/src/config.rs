//! Monitor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll interval (milliseconds)
    pub health_check_interval_ms: u64,

    /// Upper bound for each endpoint probe (milliseconds)
    pub api_timeout_ms: u64,

    /// Recovery cycles allowed inside one window before the breaker opens
    pub max_recovery_attempts: u32,

    /// Circuit breaker window (milliseconds)
    pub recovery_window_ms: u64,

    /// First backoff delay (milliseconds)
    pub initial_backoff_ms: u64,

    /// Backoff cap (milliseconds)
    pub max_backoff_ms: u64,

    /// Process looked up for diagnostics when the API goes offline
    pub process_name: String,

    /// Directory holding the control application executable
    pub install_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 10_000,
            api_timeout_ms: 2_000,
            max_recovery_attempts: 5,
            recovery_window_ms: 120_000,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            process_name: "CameraControl.exe".to_string(),
            install_dir: PathBuf::from(r"C:\Program Files (x86)\digiCamControl"),
        }
    }
}

impl MonitorConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_millis(self.recovery_window_ms)
    }

    pub fn executable_path(&self) -> PathBuf {
        self.install_dir.join(&self.process_name)
    }

    /// Whether the control application executable exists on disk
    pub fn is_dcc_installed(&self) -> bool {
        self.executable_path().is_file()
    }
}
