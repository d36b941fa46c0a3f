//! Pooled HTTP client for the control server
//!
//! One `reqwest::Client` (keep-alive pool) is shared by every caller. A
//! semaphore bounds concurrent requests the same way a socket limit would.

use crate::command;
use crate::error::DccError;
use crate::mjpeg::MjpegSplitter;
use crate::session::{DccCameraInfo, DccSession};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Stream of JPEG frames from the live-view port
pub type LiveViewStream = BoxStream<'static, Result<Bytes, DccError>>;

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DccClientConfig {
    /// Control server host
    pub host: String,
    /// Control API port
    pub api_port: u16,
    /// Live view (MJPEG) port
    pub live_view_port: u16,
    /// Command timeout; long enough for RAW writes to finish
    pub request_timeout_ms: u64,
    /// Liveness probe timeout
    pub probe_timeout_ms: u64,
    /// session.json timeout
    pub session_timeout_ms: u64,
    /// Idle keep-alive connection lifetime
    pub socket_timeout_ms: u64,
    /// Maximum concurrent requests
    pub max_sockets: usize,
    /// Maximum idle pooled connections per host
    pub max_idle_sockets: usize,
}

impl Default for DccClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            api_port: 5513,
            live_view_port: 5514,
            request_timeout_ms: 25_000,
            probe_timeout_ms: 2_000,
            session_timeout_ms: 5_000,
            socket_timeout_ms: 30_000,
            max_sockets: 10,
            max_idle_sockets: 5,
        }
    }
}

/// Pool diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub max_connections: usize,
    pub available_permits: usize,
    pub in_flight: usize,
}

/// Control server client
pub struct DccClient {
    config: DccClientConfig,
    /// `None` once shut down
    http: RwLock<Option<reqwest::Client>>,
    permits: Arc<Semaphore>,
}

impl DccClient {
    /// Create a client and its connection pool
    pub fn new(config: DccClientConfig) -> Result<Self, DccError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_sockets)
            .pool_idle_timeout(Duration::from_millis(config.socket_timeout_ms))
            .tcp_keepalive(Duration::from_millis(1_000))
            .connect_timeout(Duration::from_millis(config.probe_timeout_ms))
            .build()
            .map_err(|e| DccError::Transport(e.to_string()))?;

        info!(
            "DCC HTTP client initialized for {}:{} (live view {}), keep-alive pool of {}",
            config.host, config.api_port, config.live_view_port, config.max_sockets
        );

        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_sockets.max(1))),
            http: RwLock::new(Some(http)),
            config,
        })
    }

    /// Client configuration
    pub fn config(&self) -> &DccClientConfig {
        &self.config
    }

    /// Send a command such as `cmd=Capture` and return the response body
    pub async fn send_command(&self, command: &str) -> Result<String, DccError> {
        let url = self.url(self.config.api_port, &format!("/?{}", command));
        debug!("Sending DCC command: {}", command);
        self.get_text(&url, self.config.request_timeout_ms).await
    }

    /// Liveness probe. Never fails: any error or timeout is `false`.
    pub async fn check_port(&self, port: u16, path: &str) -> bool {
        let url = self.url(port, path);
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);

        let probe = async {
            let http = self.http().ok()?;
            let _permit = self.permits.acquire().await.ok()?;
            // Status line is enough; the live view endpoint never ends its body
            let response = http.get(&url).send().await.ok()?;
            Some(response.status().is_success())
        };

        match tokio::time::timeout(timeout, probe).await {
            Ok(Some(healthy)) => healthy,
            Ok(None) => {
                debug!("Probe {} failed", url);
                false
            }
            Err(_) => {
                debug!("Probe {} timed out after {}ms", url, self.config.probe_timeout_ms);
                false
            }
        }
    }

    /// Control API liveness
    pub async fn check_api_health(&self) -> bool {
        self.check_port(self.config.api_port, &format!("/?{}", command::SESSION))
            .await
    }

    /// Live view stream liveness (only up while the live view window is open)
    pub async fn check_live_view_health(&self) -> bool {
        self.check_port(self.config.live_view_port, "/live").await
    }

    /// Fetch and parse `/session.json`
    pub async fn fetch_session(&self) -> Result<DccSession, DccError> {
        let url = self.url(self.config.api_port, "/session.json");
        let body = self.get_text(&url, self.config.session_timeout_ms).await?;
        let body = body.trim();

        if body.is_empty() {
            return Err(DccError::InvalidResponse("empty session.json".to_string()));
        }
        if !body.starts_with('{') {
            return Err(DccError::InvalidResponse(
                "session.json is not a JSON object".to_string(),
            ));
        }

        Ok(serde_json::from_str(body)?)
    }

    /// Current camera identity
    pub async fn camera_info(&self) -> Result<DccCameraInfo, DccError> {
        let session = self.fetch_session().await?;
        Ok(session.camera_info())
    }

    /// Open the MJPEG live view stream and split it into JPEG frames.
    /// The stream holds one connection permit while it is alive.
    pub async fn live_view_frames(&self) -> Result<LiveViewStream, DccError> {
        let url = self.url(self.config.live_view_port, "/live");
        let http = self.http()?;
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DccError::Closed)?;

        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|e| DccError::from_reqwest(e, self.config.probe_timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DccError::Command {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        debug!("Live view stream opened: {}", url);
        let body = Box::pin(response.bytes_stream());

        let frames = stream::unfold(
            (body, MjpegSplitter::default(), permit),
            |(mut body, mut splitter, permit)| async move {
                loop {
                    if let Some(frame) = splitter.next_frame() {
                        return Some((Ok(frame), (body, splitter, permit)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => splitter.push(&chunk),
                        Some(Err(e)) => {
                            return Some((
                                Err(DccError::Transport(e.to_string())),
                                (body, splitter, permit),
                            ))
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(frames.boxed())
    }

    /// Pool diagnostics
    pub fn stats(&self) -> ClientStats {
        let max_connections = self.config.max_sockets.max(1);
        let available_permits = self.permits.available_permits();
        ClientStats {
            max_connections,
            available_permits,
            in_flight: max_connections.saturating_sub(available_permits),
        }
    }

    /// Close the pool. In-flight requests finish; new ones fail with `Closed`.
    pub fn shutdown(&self) {
        self.permits.close();
        let dropped = match self.http.write() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if dropped {
            info!("DCC HTTP client destroyed");
        }
    }

    /// Whether `shutdown()` has been called
    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.config.host, port, path)
    }

    fn http(&self) -> Result<reqwest::Client, DccError> {
        let guard = self.http.read().map_err(|_| DccError::Closed)?;
        guard.clone().ok_or(DccError::Closed)
    }

    async fn get_text(&self, url: &str, timeout_ms: u64) -> Result<String, DccError> {
        let http = self.http()?;
        let _permit = self.permits.acquire().await.map_err(|_| DccError::Closed)?;

        let response = http
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| DccError::from_reqwest(e, timeout_ms))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DccError::from_reqwest(e, timeout_ms))?;

        if status.is_success() {
            Ok(body)
        } else {
            warn!("DCC request {} returned HTTP {}", url, status.as_u16());
            Err(DccError::Command {
                status: status.as_u16(),
                body,
            })
        }
    }
}
