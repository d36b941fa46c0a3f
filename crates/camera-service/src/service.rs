//! Camera service implementation

use crate::config::ServiceConfig;
use crate::control::CameraControl;
use crate::error::CameraError;
use crate::scan::find_newest_capture;
use crate::types::{CameraInfo, CameraStatus, CaptureResult, LiveViewFrame};
use capture_watcher::{CaptureFilter, CaptureWatcher};
use chrono::Utc;
use dcc_client::{command, DccClient};
use dcc_monitor::{MonitorEvent, MonitorSnapshot, MonitorState};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Camera facade over the control client, capture watcher and monitor state
pub struct CameraService<C: CameraControl = DccClient> {
    control: Arc<C>,
    watcher: Arc<CaptureWatcher>,
    monitor: watch::Receiver<MonitorSnapshot>,
    config: ServiceConfig,
    session: Mutex<CameraStatus>,
    live_view_pump: Mutex<Option<JoinHandle<()>>>,
}

impl<C: CameraControl> CameraService<C> {
    pub fn new(
        control: Arc<C>,
        watcher: Arc<CaptureWatcher>,
        monitor: watch::Receiver<MonitorSnapshot>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            control,
            watcher,
            monitor,
            config,
            session: Mutex::new(CameraStatus::default()),
            live_view_pump: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Cameras the control server currently drives (zero or one).
    ///
    /// Gated on the cached monitor state like `connect`.
    pub async fn get_cameras(&self) -> Result<Vec<CameraInfo>, CameraError> {
        self.ensure_available()?;

        let info = self.control.camera_info().await?;
        if !info.connected {
            debug!("Control server reports no camera attached");
            return Ok(Vec::new());
        }
        Ok(vec![CameraInfo::from(info)])
    }

    /// Connect to the camera attached to the control server.
    ///
    /// Fails fast with `DeviceUnavailable` from the cached monitor state;
    /// no request is made unless the monitor reports `Online`.
    pub async fn connect(&self, camera_id: Option<&str>) -> Result<CameraInfo, CameraError> {
        self.ensure_available()?;
        self.reset_session();

        let info = match self.control.camera_info().await {
            Ok(info) => info,
            Err(e) => {
                let err = CameraError::from(e);
                self.record_error(&err);
                return Err(err);
            }
        };

        if !info.connected {
            let err = CameraError::NoCameraDetected;
            self.record_error(&err);
            return Err(err);
        }

        let camera = CameraInfo::from(info);
        if let Some(requested) = camera_id {
            if requested != camera.id {
                warn!(
                    "Requested camera {} but the control server reports {}",
                    requested, camera.id
                );
            }
        }

        {
            let mut session = lock(&self.session);
            session.connected = true;
            session.camera_info = Some(camera.clone());
            session.error = None;
        }
        info!("Camera connected: {} ({})", camera.model, camera.id);
        Ok(camera)
    }

    /// Stop live view if active and forget the session. Never fails.
    pub async fn disconnect(&self) {
        if lock(&self.session).live_view_active {
            if let Err(e) = self.stop_live_view().await {
                warn!("Failed to stop live view during disconnect: {}", e);
            }
        }
        self.abort_pump();
        self.reset_session();
        info!("Camera disconnected");
    }

    /// Open live view and feed every frame to `on_frame` until stopped
    pub async fn start_live_view<F>(&self, on_frame: F) -> Result<(), CameraError>
    where
        F: FnMut(LiveViewFrame) + Send + 'static,
    {
        self.ensure_connected()?;
        if lock(&self.session).live_view_active {
            return Err(CameraError::LiveViewActive);
        }

        let health = self.monitor.borrow().health;
        if health.is_some_and(|h| !h.live_view) {
            warn!("Live view port did not answer the last health check");
        }

        self.control.send_command(command::LIVE_VIEW_SHOW).await?;
        tokio::time::sleep(Duration::from_millis(self.config.live_view_settle_ms)).await;
        self.control.send_command(command::LIVE_VIEW_ENABLE).await?;

        let pump = tokio::spawn(run_frame_pump(
            Arc::clone(&self.control),
            on_frame,
            Duration::from_millis(self.config.live_view_retry_ms),
        ));
        if let Some(previous) = lock(&self.live_view_pump).replace(pump) {
            previous.abort();
        }

        lock(&self.session).live_view_active = true;
        info!("Live view started");
        Ok(())
    }

    /// Stop the frame pump and hide the live view window
    pub async fn stop_live_view(&self) -> Result<(), CameraError> {
        self.abort_pump();
        let was_active = std::mem::replace(&mut lock(&self.session).live_view_active, false);
        if was_active {
            self.control.send_command(command::LIVE_VIEW_HIDE).await?;
            info!("Live view stopped");
        }
        Ok(())
    }

    /// Take a picture and return the file the camera wrote.
    ///
    /// Command failures propagate. A missed file detection degrades to a
    /// folder scan; scan failures are reported in the result, not as errors.
    pub async fn capture(&self) -> Result<CaptureResult, CameraError> {
        self.ensure_connected()?;

        if self.watcher.is_running() {
            let pending = self.watcher.register_capture(self.config.capture_timeout());
            self.control.send_command(command::CAPTURE).await?;
            debug!("Capture command sent, waiting for watcher");

            match pending.wait().await {
                Ok(path) => return Ok(self.capture_succeeded(path)),
                Err(e) => warn!("Watcher did not report the capture ({}), scanning folders", e),
            }
            return Ok(self.fallback_capture().await);
        }

        debug!("Watcher not running, using folder scan");
        self.control.send_command(command::CAPTURE).await?;
        Ok(self.fallback_capture().await)
    }

    /// Cached session state; no device probe
    pub fn status(&self) -> CameraStatus {
        lock(&self.session).clone()
    }

    /// Drop the session when the monitor loses the control server
    pub async fn handle_monitor_state(&self, state: MonitorState) {
        if !state.is_down() || !lock(&self.session).connected {
            return;
        }

        warn!("Monitor reports {}, resetting camera session", state);
        self.abort_pump();
        self.reset_session();
        lock(&self.session).error = Some(format!("Camera control server {}", state));
    }

    /// Forward monitor state changes to `handle_monitor_state`
    pub fn spawn_monitor_guard(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<MonitorEvent>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MonitorEvent::StateChanged { new, .. }) => {
                        service.handle_monitor_state(new).await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Monitor guard lagged by {} events", skipped);
                        let current = service.monitor.borrow().state;
                        service.handle_monitor_state(current).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn fallback_capture(&self) -> CaptureResult {
        tokio::time::sleep(self.config.settle_delay()).await;

        let filter = CaptureFilter::new(self.watcher.root(), self.watcher.config());
        let session_dirs = self.config.scan_session_dirs;
        let scanned =
            tokio::task::spawn_blocking(move || find_newest_capture(&filter, session_dirs)).await;

        let found = match scanned {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => return self.capture_failed(CameraError::Io(e)),
            Err(e) => {
                error!("Capture folder scan panicked: {}", e);
                return self.capture_failed(CameraError::CaptureTimeout(e.to_string()));
            }
        };

        match found {
            Some((path, modified)) => {
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                if age < self.config.freshness() {
                    info!("Capture found by folder scan: {}", path.display());
                    self.capture_succeeded(path)
                } else {
                    self.capture_failed(CameraError::CaptureTimeout(format!(
                        "newest image {} is {}ms old",
                        path.display(),
                        age.as_millis()
                    )))
                }
            }
            None => self.capture_failed(CameraError::CaptureTimeout(
                "no image found in recent session folders".to_string(),
            )),
        }
    }

    fn capture_succeeded(&self, path: PathBuf) -> CaptureResult {
        info!("Captured {}", path.display());
        let mut session = lock(&self.session);
        session.last_captured_file = Some(path.clone());
        session.error = None;
        CaptureResult::succeeded(path)
    }

    fn capture_failed(&self, err: CameraError) -> CaptureResult {
        warn!("Capture failed: {}", err);
        self.record_error(&err);
        CaptureResult::failed(err.to_string())
    }

    fn ensure_available(&self) -> Result<(), CameraError> {
        let state = self.monitor.borrow().state;
        if state == MonitorState::Online {
            Ok(())
        } else {
            warn!("Camera request refused: monitor state is {}", state);
            Err(CameraError::DeviceUnavailable(state.to_string()))
        }
    }

    fn ensure_connected(&self) -> Result<(), CameraError> {
        if lock(&self.session).connected {
            Ok(())
        } else {
            Err(CameraError::NotConnected)
        }
    }

    fn record_error(&self, err: &CameraError) {
        lock(&self.session).error = Some(err.to_string());
    }

    fn reset_session(&self) {
        *lock(&self.session) = CameraStatus::default();
    }

    fn abort_pump(&self) {
        if let Some(pump) = lock(&self.live_view_pump).take() {
            pump.abort();
        }
    }
}

impl<C: CameraControl> Drop for CameraService<C> {
    fn drop(&mut self) {
        self.abort_pump();
    }
}

async fn run_frame_pump<C, F>(control: Arc<C>, mut on_frame: F, retry: Duration)
where
    C: CameraControl,
    F: FnMut(LiveViewFrame) + Send + 'static,
{
    loop {
        match control.live_view_frames().await {
            Ok(mut frames) => {
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(data) => on_frame(LiveViewFrame {
                            data,
                            timestamp: Utc::now().timestamp_millis(),
                        }),
                        Err(e) => {
                            warn!("Live view stream error: {}", e);
                            break;
                        }
                    }
                }
                debug!("Live view stream ended");
            }
            Err(e) => warn!("Failed to open live view stream: {}", e),
        }
        tokio::time::sleep(retry).await;
    }
}
