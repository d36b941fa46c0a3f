//! Health and process probes

use async_trait::async_trait;
use dcc_client::DccClient;
use tokio::process::Command;
use tracing::debug;

/// Endpoint liveness checks used by the monitor.
///
/// Implementations must never fail; an unreachable endpoint is `false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn api_healthy(&self) -> bool;
    async fn live_view_healthy(&self) -> bool;
}

#[async_trait]
impl HealthProbe for DccClient {
    async fn api_healthy(&self) -> bool {
        self.check_api_health().await
    }

    async fn live_view_healthy(&self) -> bool {
        self.check_live_view_health().await
    }
}

/// Reports whether the control application process is running.
/// Diagnostic only; the monitor never restarts anything.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_running(&self) -> bool;
}

/// Process lookup through the platform task list
#[derive(Debug, Clone)]
pub struct TaskListProbe {
    process_name: String,
}

impl TaskListProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }
}

impl Default for TaskListProbe {
    fn default() -> Self {
        Self::new("CameraControl.exe")
    }
}

#[async_trait]
impl ProcessProbe for TaskListProbe {
    async fn is_running(&self) -> bool {
        let output = if cfg!(windows) {
            Command::new("tasklist")
                .args([
                    "/FI",
                    &format!("IMAGENAME eq {}", self.process_name),
                    "/FO",
                    "CSV",
                    "/NH",
                ])
                .output()
                .await
        } else {
            Command::new("pgrep")
                .args(["-f", &self.process_name])
                .output()
                .await
        };

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                if cfg!(windows) {
                    stdout.contains(&self.process_name)
                } else {
                    out.status.success() && !stdout.trim().is_empty()
                }
            }
            Err(e) => {
                debug!("Process lookup for {} failed: {}", self.process_name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_process_not_running() {
        let probe = TaskListProbe::new("definitely-not-a-real-process-4f1c9");
        assert!(!probe.is_running().await);
    }

    #[test]
    fn test_default_process_name() {
        assert_eq!(TaskListProbe::default().process_name(), "CameraControl.exe");
    }
}
