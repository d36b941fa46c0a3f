//! Monitor state, health snapshots and events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Monitor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Monitor not running
    #[default]
    Stopped,
    /// Health check pending or in progress
    Checking,
    /// Control API responding
    Online,
    /// Control API not responding
    Offline,
    /// Waiting out a backoff before the next check
    Recovering,
    /// Circuit breaker open; needs a manual retry
    Failed,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Stopped => "stopped",
            MonitorState::Checking => "checking",
            MonitorState::Online => "online",
            MonitorState::Offline => "offline",
            MonitorState::Recovering => "recovering",
            MonitorState::Failed => "failed",
        }
    }

    /// Offline or failed: the device should be treated as gone
    pub fn is_down(&self) -> bool {
        matches!(self, MonitorState::Offline | MonitorState::Failed)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one poll of both endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Control API port responding
    pub api: bool,
    /// Live view port responding
    pub live_view: bool,
    /// When the poll completed (unix ms)
    pub timestamp: i64,
}

/// Value published on the status channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MonitorSnapshot {
    pub state: MonitorState,
    /// Last poll result, `None` before the first poll
    pub health: Option<HealthStatus>,
}

impl MonitorSnapshot {
    pub fn is_online(&self) -> bool {
        self.state == MonitorState::Online
    }
}

/// Monitor notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Emitted only on real transitions
    StateChanged { new: MonitorState, old: MonitorState },
    /// Emitted every poll cycle
    HealthChecked(HealthStatus),
    RecoveryStarted { attempt: u32, delay: Duration },
    RecoveryFailed { reason: String },
}
