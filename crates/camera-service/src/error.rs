//! Camera service error types

use capture_watcher::WatcherError;
use dcc_client::DccError;
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Camera command failed with HTTP {status}: {body}")]
    Command { status: u16, body: String },

    /// Monitor does not report the control server online
    #[error("Camera control server unavailable (monitor state: {0})")]
    DeviceUnavailable(String),

    #[error("Camera not connected")]
    NotConnected,

    #[error("Live view already active")]
    LiveViewActive,

    #[error("No camera detected by the control server")]
    NoCameraDetected,

    #[error("Capture timeout: {0}")]
    CaptureTimeout(String),

    #[error("File watcher stopped")]
    WatcherStopped,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP client is shut down")]
    Closed,

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Notify(String),
}

impl From<DccError> for CameraError {
    fn from(err: DccError) -> Self {
        match err {
            DccError::Transport(msg) => CameraError::Transport(msg),
            DccError::Timeout(ms) => CameraError::Timeout(ms),
            DccError::Command { status, body } => CameraError::Command { status, body },
            DccError::InvalidResponse(msg) => CameraError::InvalidResponse(msg),
            DccError::Closed => CameraError::Closed,
        }
    }
}

impl From<WatcherError> for CameraError {
    fn from(err: WatcherError) -> Self {
        match err {
            WatcherError::CaptureTimeout(ms) => {
                CameraError::CaptureTimeout(format!("no file detected within {}ms", ms))
            }
            WatcherError::Stopped => CameraError::WatcherStopped,
            WatcherError::Io(e) => CameraError::Io(e),
            WatcherError::Notify(e) => CameraError::Notify(e.to_string()),
        }
    }
}
