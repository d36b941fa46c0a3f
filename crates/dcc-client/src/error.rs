//! Control server error types

use thiserror::Error;

/// Errors that can occur while talking to the control server
#[derive(Debug, Error)]
pub enum DccError {
    /// Connection refused, reset, or otherwise broken
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response within the request timeout
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Command { status: u16, body: String },

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Client was shut down
    #[error("HTTP client is shut down")]
    Closed,
}

impl DccError {
    /// Map a reqwest failure, reporting timeouts with the configured budget
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            DccError::Timeout(timeout_ms)
        } else {
            DccError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DccError {
    fn from(err: serde_json::Error) -> Self {
        DccError::InvalidResponse(err.to_string())
    }
}
