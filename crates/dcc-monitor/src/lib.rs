//! Camera-Control Process Monitor
//!
//! Polls the control server in the background and drives automatic
//! recovery with exponential backoff and a circuit breaker. Status reads
//! are served from a cached snapshot and never touch the network.

mod breaker;
mod config;
mod monitor;
mod probe;
mod state;

pub use breaker::{backoff_delay, CircuitBreaker};
pub use config::MonitorConfig;
pub use monitor::DccMonitor;
pub use probe::{HealthProbe, ProcessProbe, TaskListProbe};
pub use state::{HealthStatus, MonitorEvent, MonitorSnapshot, MonitorState};

use thiserror::Error;

/// Monitor error types
#[derive(Debug, Error)]
pub enum MonitorError {
    /// `start()` was called outside a Tokio runtime
    #[error("No Tokio runtime available to run the monitor")]
    NoRuntime,
}
