//! Facade data types

use bytes::Bytes;
use chrono::Utc;
use dcc_client::DccCameraInfo;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Identity of the connected camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    /// Serial number, or the model when the serial is unknown
    pub id: String,
    pub model: String,
    pub serial_number: String,
}

impl From<DccCameraInfo> for CameraInfo {
    fn from(info: DccCameraInfo) -> Self {
        let id = if info.serial == "unknown" {
            info.model.clone()
        } else {
            info.serial.clone()
        };
        Self {
            id,
            model: info.model,
            serial_number: info.serial,
        }
    }
}

/// Cached session state reported by `status()`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub connected: bool,
    pub live_view_active: bool,
    pub camera_info: Option<CameraInfo>,
    pub last_captured_file: Option<PathBuf>,
    pub error: Option<String>,
}

/// Outcome of one capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    /// `file://` URL for the renderer
    pub preview_url: Option<String>,
    /// Completion time (unix ms)
    pub timestamp: Option<i64>,
    pub error: Option<String>,
}

impl CaptureResult {
    pub fn succeeded(path: PathBuf) -> Self {
        Self {
            success: true,
            preview_url: Some(preview_url(&path)),
            file_path: Some(path),
            timestamp: Some(Utc::now().timestamp_millis()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            file_path: None,
            preview_url: None,
            timestamp: None,
            error: Some(error.into()),
        }
    }
}

/// One JPEG frame from the live view stream
#[derive(Debug, Clone)]
pub struct LiveViewFrame {
    pub data: Bytes,
    /// Arrival time (unix ms)
    pub timestamp: i64,
}

/// `file://` URL for a local path; Windows drive paths get `file:///C:/...`
pub fn preview_url(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let bytes = normalized.as_bytes();
    let has_drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    if has_drive {
        format!("file:///{}", normalized)
    } else {
        format!("file://{}", normalized)
    }
}
