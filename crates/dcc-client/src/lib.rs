//! digiCamControl HTTP Client
//!
//! This crate talks to the local camera-control server that drives the
//! DSLR. It keeps a small keep-alive connection pool shared by:
//! - Control commands (capture, live view window) on the API port
//! - Liveness probes used by the health monitor
//! - The MJPEG live-view stream on the second port

mod client;
mod error;
mod mjpeg;
mod session;

pub use client::{ClientStats, DccClient, DccClientConfig, LiveViewStream};
pub use error::DccError;
pub use mjpeg::MjpegSplitter;
pub use session::{DccCameraInfo, DccSession, SessionFile, FileNameTemplate};

/// Control server command strings
pub mod command {
    /// Session query, also used as the API liveness path
    pub const SESSION: &str = "cmd=session";
    /// Trigger a capture
    pub const CAPTURE: &str = "cmd=Capture";
    /// Open the live view window
    pub const LIVE_VIEW_SHOW: &str = "cmd=LiveViewWnd_Show";
    /// Close the live view window
    pub const LIVE_VIEW_HIDE: &str = "cmd=LiveViewWnd_Hide";
    /// Start streaming live view frames
    pub const LIVE_VIEW_ENABLE: &str = "cmd=DoLiveView";
}
