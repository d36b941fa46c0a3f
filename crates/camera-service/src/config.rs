//! Facade configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Camera service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Fast-path wait for the watcher (milliseconds)
    pub capture_timeout_ms: u64,

    /// Delay before the fallback folder scan (milliseconds)
    pub settle_delay_ms: u64,

    /// Maximum age of a file found by the fallback scan (milliseconds)
    pub freshness_ms: u64,

    /// Most recent session folders searched by the fallback scan
    pub scan_session_dirs: usize,

    /// Pause between showing the live view window and enabling it (milliseconds)
    pub live_view_settle_ms: u64,

    /// Delay before reopening a broken live view stream (milliseconds)
    pub live_view_retry_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 15_000,
            settle_delay_ms: 1_500,
            freshness_ms: 20_000,
            scan_session_dirs: 2,
            live_view_settle_ms: 1_000,
            live_view_retry_ms: 2_000,
        }
    }
}

impl ServiceConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}
