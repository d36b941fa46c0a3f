//! Seam between the facade and the control server

use async_trait::async_trait;
use dcc_client::{DccCameraInfo, DccClient, DccError, LiveViewStream};

/// Operations the facade needs from the control server
#[async_trait]
pub trait CameraControl: Send + Sync + 'static {
    async fn send_command(&self, command: &str) -> Result<String, DccError>;
    async fn camera_info(&self) -> Result<DccCameraInfo, DccError>;
    async fn live_view_frames(&self) -> Result<LiveViewStream, DccError>;
}

#[async_trait]
impl CameraControl for DccClient {
    async fn send_command(&self, command: &str) -> Result<String, DccError> {
        DccClient::send_command(self, command).await
    }

    async fn camera_info(&self) -> Result<DccCameraInfo, DccError> {
        DccClient::camera_info(self).await
    }

    async fn live_view_frames(&self) -> Result<LiveViewStream, DccError> {
        DccClient::live_view_frames(self).await
    }
}
