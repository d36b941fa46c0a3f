//! Capture folder watcher

use crate::filter::CaptureFilter;
use crate::pending::{PendingCapture, PendingQueue};
use crate::stability::{Observation, StabilityTracker};
use crate::{CaptureFileEvent, WatcherConfig, WatcherError, WatcherEvent};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Watcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Starting,
    Running,
}

struct WatchRuntime {
    // Dropping the notify watcher closes the OS watch
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    root: PathBuf,
}

/// Watches the capture root and resolves pending capture waits in FIFO order
pub struct CaptureWatcher {
    config: WatcherConfig,
    state: Mutex<WatcherState>,
    running: AtomicBool,
    pending: PendingQueue,
    events: broadcast::Sender<WatcherEvent>,
    runtime: Mutex<Option<WatchRuntime>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CaptureWatcher {
    /// Create a stopped watcher
    pub fn new(config: WatcherConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            state: Mutex::new(WatcherState::Stopped),
            running: AtomicBool::new(false),
            pending: PendingQueue::default(),
            events,
            runtime: Mutex::new(None),
        }
    }

    /// Start watching. No-op when already started. Returns once the OS
    /// watch is registered.
    pub async fn start(&self) -> Result<(), WatcherError> {
        {
            let mut state = lock(&self.state);
            if *state != WatcherState::Stopped {
                info!("File watcher already running");
                return Ok(());
            }
            *state = WatcherState::Starting;
        }

        let runtime = match self.open_watch().await {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to start file watcher: {}", e);
                *lock(&self.state) = WatcherState::Stopped;
                return Err(e);
            }
        };

        let mut state = lock(&self.state);
        if *state != WatcherState::Starting {
            // stop() raced with start()
            runtime.task.abort();
            return Err(WatcherError::Stopped);
        }
        info!("File watcher ready on {}", runtime.root.display());
        *lock(&self.runtime) = Some(runtime);
        *state = WatcherState::Running;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn open_watch(&self) -> Result<WatchRuntime, WatcherError> {
        let root = &self.config.root;
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            info!("Creating capture watch directory: {}", root.display());
        }
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let event_loop = EventLoop {
            filter: CaptureFilter::new(root.clone(), &self.config),
            tracker: StabilityTracker::new(Duration::from_millis(self.config.stability_ms)),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
            pending: self.pending.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(event_loop.run(raw_rx));

        Ok(WatchRuntime {
            watcher,
            task,
            root,
        })
    }

    /// Close the watch and fail every pending capture with `Stopped`
    pub async fn stop(&self) {
        let runtime = lock(&self.runtime).take();
        *lock(&self.state) = WatcherState::Stopped;
        self.running.store(false, Ordering::Release);

        if let Some(runtime) = runtime {
            drop(runtime.watcher);
            runtime.task.abort();
            let _ = runtime.task.await;
            info!("File watcher stopped");
        }

        let rejected = self.pending.reject_all(|| WatcherError::Stopped);
        if rejected > 0 {
            warn!("Rejected {} pending capture waits on stop", rejected);
        }
    }

    /// Cheap running check, no I/O
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> WatcherState {
        *lock(&self.state)
    }

    /// Enqueue a wait for the next capture without awaiting it yet
    pub fn register_capture(&self, timeout: Duration) -> PendingCapture {
        self.pending.register(timeout)
    }

    /// Resolve with the next qualifying file, oldest waiter first
    pub async fn wait_for_next_capture(&self, timeout: Duration) -> Result<PathBuf, WatcherError> {
        self.register_capture(timeout).wait().await
    }

    /// `wait_for_next_capture` with the configured default timeout
    pub async fn wait_for_default_capture(&self) -> Result<PathBuf, WatcherError> {
        self.wait_for_next_capture(Duration::from_millis(self.config.default_timeout_ms))
            .await
    }

    /// Subscribe to observability events
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    /// Watched root while running
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        lock(&self.runtime)
            .as_ref()
            .map(|rt| vec![rt.root.clone()])
            .unwrap_or_default()
    }

    /// Configured capture root
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Owns the stability tracker; the only consumer of raw notify events
struct EventLoop {
    filter: CaptureFilter,
    tracker: StabilityTracker,
    poll_interval: Duration,
    pending: PendingQueue,
    events: broadcast::Sender<WatcherEvent>,
}

impl EventLoop {
    async fn run(mut self, mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                raw = raw_rx.recv() => match raw {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(err)) => {
                        error!("File watcher error: {}", err);
                        let _ = self.events.send(WatcherEvent::Error(err.to_string()));
                    }
                    None => break,
                },
                _ = ticker.tick(), if !self.tracker.is_empty() => self.check_stability().await,
            }
        }
        debug!("File watcher event loop ended");
    }

    async fn handle_event(&mut self, event: Event) {
        let now = Instant::now();
        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    self.on_created(path, kind == CreateKind::Folder).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.tracker.forget(path);
                }
            }
            // Renamed into place, e.g. a temp file finishing as .jpg
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(from) = event.paths.first() {
                    self.tracker.forget(from);
                }
                if let Some(to) = event.paths.last() {
                    self.on_created(to, false).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if tokio::fs::try_exists(path).await.unwrap_or(false) {
                        self.on_created(path, false).await;
                    } else {
                        self.tracker.forget(path);
                    }
                }
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.tracker.touch(path, now);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.tracker.forget(path);
                }
            }
            _ => {}
        }
    }

    async fn on_created(&mut self, path: &Path, folder: bool) {
        if self.filter.is_ignored(path) || !self.filter.within_depth(path) {
            return;
        }

        let is_dir = folder
            || tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);

        if is_dir {
            debug!("New session folder detected: {}", path.display());
            let _ = self
                .events
                .send(WatcherEvent::SessionCreated(path.to_path_buf()));
            return;
        }

        if !self.filter.is_image(path) {
            debug!("Ignoring non-image file: {}", path.display());
            return;
        }

        debug!("Tracking new capture file: {}", path.display());
        self.tracker.track(path.to_path_buf(), Instant::now());
    }

    async fn check_stability(&mut self) {
        let now = Instant::now();
        for path in self.tracker.paths() {
            let metadata = tokio::fs::metadata(&path).await.ok();
            let size = metadata.as_ref().map(|m| m.len());
            match self.tracker.observe(&path, size, now) {
                Observation::Stable => self.file_added(path, metadata),
                Observation::Gone => debug!("Capture file vanished: {}", path.display()),
                Observation::Pending => {}
            }
        }
    }

    fn file_added(&self, path: PathBuf, metadata: Option<Metadata>) {
        let event = CaptureFileEvent {
            timestamp: metadata
                .as_ref()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
            path,
        };
        info!("Capture file ready: {} ({} bytes)", event.path.display(), event.size);

        if !self.pending.resolve_oldest(&event.path) {
            debug!("No pending capture waits for {}", event.path.display());
        }
        let _ = self.events.send(WatcherEvent::ImageCaptured(event));
    }
}
