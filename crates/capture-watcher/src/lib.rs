//! Capture File Watcher
//!
//! Watches the control server's output folder and hands newly written
//! images to whoever is waiting for the next capture:
//! - Recursive watch with a depth bound (`root/session/images/file`)
//! - Stability debounce so half-written RAW files are never handed out
//! - FIFO queue of pending capture waits with individual deadlines
//! - Broadcast events for observers (captured image, new session folder)

mod filter;
mod pending;
mod stability;
mod watcher;

pub use filter::CaptureFilter;
pub use pending::PendingCapture;
pub use watcher::{CaptureWatcher, WatcherState};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Watcher error types
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Capture timeout: no file detected within {0}ms")]
    CaptureTimeout(u64),

    #[error("File watcher stopped")]
    Stopped,

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),
}

/// Newly detected capture file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFileEvent {
    pub path: PathBuf,
    /// File modification time (unix ms)
    pub timestamp: i64,
    pub size: u64,
}

/// Observability events, independent of the pending-capture API
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// A qualifying image finished writing
    ImageCaptured(CaptureFileEvent),
    /// A new subdirectory appeared (the server started a session folder)
    SessionCreated(PathBuf),
    /// The underlying watch reported an error; the watcher keeps running
    Error(String),
}

/// Watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Capture root the server writes session folders into
    pub root: PathBuf,
    /// Directory levels below the root to watch
    pub max_depth: usize,
    /// Quiet period before a new file counts as fully written
    pub stability_ms: u64,
    /// How often growing files are re-sampled
    pub poll_interval_ms: u64,
    /// Image extensions that qualify (case-insensitive, no dot)
    pub extensions: Vec<String>,
    /// Extensions that never qualify
    pub ignored_extensions: Vec<String>,
    /// Path components that are never watched
    pub ignored_dirs: Vec<String>,
    /// Timeout used by `wait_for_default_capture`
    pub default_timeout_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            root: default_capture_root(),
            max_depth: 3,
            stability_ms: 500,
            poll_interval_ms: 100,
            extensions: ["jpg", "jpeg", "cr2", "cr3", "nef", "arw", "dng"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignored_extensions: vec!["tmp".to_string(), "lock".to_string()],
            ignored_dirs: vec![".git".to_string(), "node_modules".to_string()],
            default_timeout_ms: 20_000,
        }
    }
}

impl WatcherConfig {
    /// Config rooted at a specific directory, other fields default
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}

/// `<home>/Pictures/digiCamControl`, the server's default output folder
pub fn default_capture_root() -> PathBuf {
    let home = std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join("Pictures").join("digiCamControl")
}
