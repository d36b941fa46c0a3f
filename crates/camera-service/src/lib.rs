//! Camera Service Facade
//!
//! Single entry point for the booth's camera operations:
//! - Connect / disconnect gated on the cached monitor state
//! - Live view control with a frame pump feeding a callback
//! - Capture through the file watcher, with a folder-scan fallback

mod config;
mod control;
mod error;
mod scan;
mod service;
mod types;

pub use config::ServiceConfig;
pub use control::CameraControl;
pub use error::CameraError;
pub use scan::find_newest_capture;
pub use service::CameraService;
pub use types::{preview_url, CameraInfo, CameraStatus, CaptureResult, LiveViewFrame};
