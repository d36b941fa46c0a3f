//! Health monitor worker and handle
//!
//! A single worker task owns the poll timer, the circuit breaker and the
//! recovery deadline, so polls never overlap. The handle publishes state
//! through a `watch` channel and events through `broadcast`.

use crate::breaker::CircuitBreaker;
use crate::config::MonitorConfig;
use crate::probe::{HealthProbe, ProcessProbe};
use crate::state::{HealthStatus, MonitorEvent, MonitorSnapshot, MonitorState};
use crate::MonitorError;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 128;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Apply a state change and emit `StateChanged` only when the value differs
fn publish_transition(
    status: &watch::Sender<MonitorSnapshot>,
    events: &broadcast::Sender<MonitorEvent>,
    new: MonitorState,
) -> bool {
    let mut old = new;
    let changed = status.send_if_modified(|snapshot| {
        old = snapshot.state;
        if snapshot.state == new {
            false
        } else {
            snapshot.state = new;
            true
        }
    });

    if changed {
        info!("DCC monitor state: {} -> {}", old, new);
        let _ = events.send(MonitorEvent::StateChanged { new, old });
    }
    changed
}

enum MonitorCommand {
    ManualRetry,
}

struct Worker {
    commands: mpsc::UnboundedSender<MonitorCommand>,
    task: JoinHandle<()>,
}

/// Background health monitor for the camera control server
pub struct DccMonitor {
    config: MonitorConfig,
    probe: Arc<dyn HealthProbe>,
    process_probe: Option<Arc<dyn ProcessProbe>>,
    status: Arc<watch::Sender<MonitorSnapshot>>,
    events: Mutex<broadcast::Sender<MonitorEvent>>,
    worker: Mutex<Option<Worker>>,
}

impl DccMonitor {
    pub fn new(config: MonitorConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (status, _) = watch::channel(MonitorSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            probe,
            process_probe: None,
            status: Arc::new(status),
            events: Mutex::new(events),
            worker: Mutex::new(None),
        }
    }

    /// Attach a process lookup used for diagnostics during recovery
    pub fn with_process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.process_probe = Some(probe);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start polling. Idempotent while the worker is alive.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.task.is_finished()) {
            debug!("DCC monitor already running");
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;
        let events = lock(&self.events).clone();

        info!(
            "Starting DCC monitor (interval {}ms, probe timeout {}ms)",
            self.config.health_check_interval_ms, self.config.api_timeout_ms
        );
        publish_transition(&self.status, &events, MonitorState::Checking);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = MonitorWorker {
            config: self.config.clone(),
            probe: Arc::clone(&self.probe),
            process_probe: self.process_probe.clone(),
            status: Arc::clone(&self.status),
            events,
            breaker: CircuitBreaker::new(&self.config),
            recovery_deadline: None,
        };
        let task = handle.spawn(task.run(rx));

        *worker = Some(Worker { commands: tx, task });
        Ok(())
    }

    /// Stop polling, move to `Stopped` and close current event listeners
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.task.abort();
            let _ = worker.task.await;
        }

        let events = {
            let mut guard = lock(&self.events);
            std::mem::replace(&mut *guard, broadcast::channel(EVENT_CAPACITY).0)
        };
        if publish_transition(&self.status, &events, MonitorState::Stopped) {
            info!("DCC monitor stopped");
        }
    }

    /// Leave `Failed`: reset the circuit breaker and check immediately.
    /// Returns `false` when the monitor is not running or not `Failed`.
    pub fn manual_retry(&self) -> bool {
        let state = self.state();
        if state != MonitorState::Failed {
            debug!("Manual retry ignored while {}", state);
            return false;
        }

        let worker = lock(&self.worker);
        match worker.as_ref() {
            Some(w) => w.commands.send(MonitorCommand::ManualRetry).is_ok(),
            None => {
                warn!("Manual retry ignored: DCC monitor is not running");
                false
            }
        }
    }

    pub fn state(&self) -> MonitorState {
        self.status.borrow().state
    }

    pub fn is_online(&self) -> bool {
        self.status.borrow().is_online()
    }

    /// Last poll result
    pub fn health_status(&self) -> Option<HealthStatus> {
        self.status.borrow().health
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MonitorSnapshot> {
        self.status.subscribe()
    }

    /// Event listener; closed by `stop()`
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        lock(&self.events).subscribe()
    }
}

impl Drop for DccMonitor {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.task.abort();
        }
    }
}

struct MonitorWorker {
    config: MonitorConfig,
    probe: Arc<dyn HealthProbe>,
    process_probe: Option<Arc<dyn ProcessProbe>>,
    status: Arc<watch::Sender<MonitorSnapshot>>,
    events: broadcast::Sender<MonitorEvent>,
    breaker: CircuitBreaker,
    recovery_deadline: Option<Instant>,
}

impl MonitorWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<MonitorCommand>) {
        let mut ticker = time::interval(self.config.health_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.recovery_deadline;
            tokio::select! {
                _ = ticker.tick() => {
                    match self.state() {
                        MonitorState::Recovering | MonitorState::Failed => {
                            debug!("Skipping health check while {}", self.state());
                        }
                        _ => self.poll().await,
                    }
                }
                _ = wait_for(deadline) => {
                    self.recovery_deadline = None;
                    self.transition(MonitorState::Checking);
                    self.poll().await;
                }
                command = commands.recv() => match command {
                    Some(MonitorCommand::ManualRetry) if self.state() != MonitorState::Failed => {
                        debug!("Manual retry ignored while {}", self.state());
                    }
                    Some(MonitorCommand::ManualRetry) => {
                        info!("Manual retry: resetting circuit breaker");
                        self.breaker.reset();
                        self.recovery_deadline = None;
                        self.transition(MonitorState::Checking);
                        self.poll().await;
                    }
                    None => break,
                },
            }
        }
    }

    fn state(&self) -> MonitorState {
        self.status.borrow().state
    }

    fn transition(&self, new: MonitorState) -> bool {
        publish_transition(&self.status, &self.events, new)
    }

    async fn poll(&mut self) {
        let limit = self.config.api_timeout();
        let (api, live_view) = tokio::join!(
            time::timeout(limit, self.probe.api_healthy()),
            time::timeout(limit, self.probe.live_view_healthy()),
        );

        let health = HealthStatus {
            api: api.unwrap_or(false),
            live_view: live_view.unwrap_or(false),
            timestamp: Utc::now().timestamp_millis(),
        };
        debug!(
            "Health check: api={} live_view={}",
            health.api, health.live_view
        );

        self.status.send_modify(|snapshot| snapshot.health = Some(health));
        let _ = self.events.send(MonitorEvent::HealthChecked(health));

        if health.api {
            if self.breaker.attempts() > 0 {
                info!(
                    "Control API recovered after {} attempt(s)",
                    self.breaker.attempts()
                );
            }
            self.breaker.reset();
            self.recovery_deadline = None;
            self.transition(MonitorState::Online);
        } else {
            self.handle_offline().await;
        }
    }

    async fn handle_offline(&mut self) {
        if matches!(self.state(), MonitorState::Online | MonitorState::Checking) {
            self.transition(MonitorState::Offline);
        }

        let now = Instant::now();
        if self.breaker.is_open(now) {
            self.transition(MonitorState::Failed);
            let reason = format!(
                "Control API still unreachable after {} recovery attempts",
                self.breaker.attempts()
            );
            error!("{}", reason);
            let _ = self.events.send(MonitorEvent::RecoveryFailed { reason });
            return;
        }

        let (attempt, delay) = self.breaker.record_attempt(now);
        self.transition(MonitorState::Recovering);
        warn!(
            "Control API offline, recovery attempt {}/{} in {}ms",
            attempt,
            self.breaker.max_attempts(),
            delay.as_millis()
        );
        let _ = self
            .events
            .send(MonitorEvent::RecoveryStarted { attempt, delay });

        if let Some(process) = &self.process_probe {
            if process.is_running().await {
                info!("{} is running but not responding", self.config.process_name);
            } else {
                warn!("{} does not appear to be running", self.config.process_name);
            }
        }

        self.recovery_deadline = Some(now + delay);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    /// Answers from a script, then from `fallback`
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        fallback: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: &[bool], fallback: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback: AtomicBool::new(fallback),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, healthy: bool) {
            self.fallback.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn api_healthy(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.load(Ordering::SeqCst))
        }

        async fn live_view_healthy(&self) -> bool {
            self.fallback.load(Ordering::SeqCst)
        }
    }

    struct CountingProcessProbe(AtomicUsize);

    #[async_trait]
    impl ProcessProbe for CountingProcessProbe {
        async fn is_running(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    fn states(events: &[MonitorEvent]) -> Vec<MonitorState> {
        events
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::StateChanged { new, .. } => Some(*new),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_state(
        rx: &mut broadcast::Receiver<MonitorEvent>,
        target: MonitorState,
        seen: &mut Vec<MonitorEvent>,
    ) {
        time::timeout(Duration::from_secs(600), async {
            loop {
                let event = rx.recv().await.unwrap();
                let done = matches!(event, MonitorEvent::StateChanged { new, .. } if new == target);
                seen.push(event);
                if done {
                    break;
                }
            }
        })
        .await
        .expect("state not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_down_ends_failed_once() {
        let probe = ScriptedProbe::new(&[], false);
        let process = Arc::new(CountingProcessProbe(AtomicUsize::new(0)));
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone())
            .with_process_probe(process.clone());
        let mut rx = monitor.subscribe();
        let started = Instant::now();

        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Failed, &mut seen).await;
        let failed_at = started.elapsed();

        // Linger: Failed must not poll or re-emit anything
        time::sleep(Duration::from_secs(60)).await;
        seen.extend(drain(&mut rx));

        let mut expected = vec![
            MonitorState::Checking,
            MonitorState::Offline,
            MonitorState::Recovering,
        ];
        for _ in 0..4 {
            expected.extend([
                MonitorState::Checking,
                MonitorState::Offline,
                MonitorState::Recovering,
            ]);
        }
        expected.extend([
            MonitorState::Checking,
            MonitorState::Offline,
            MonitorState::Failed,
        ]);
        assert_eq!(states(&seen), expected);

        let delays: Vec<Duration> = seen
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::RecoveryStarted { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert_eq!(failed_at, Duration::from_secs(31));

        let failures = seen
            .iter()
            .filter(|e| matches!(e, MonitorEvent::RecoveryFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
        assert_eq!(process.0.load(Ordering::SeqCst), 5);
        assert_eq!(monitor.state(), MonitorState::Failed);
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resets_breaker() {
        let probe = ScriptedProbe::new(&[false, true, false], true);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone());
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Online, &mut seen).await;
        assert_eq!(
            states(&seen),
            vec![
                MonitorState::Checking,
                MonitorState::Offline,
                MonitorState::Recovering,
                MonitorState::Checking,
                MonitorState::Online,
            ]
        );

        // Next scheduled poll fails: attempt counter starts over
        seen.clear();
        wait_for_state(&mut rx, MonitorState::Recovering, &mut seen).await;
        seen.extend(drain(&mut rx));
        let attempts: Vec<u32> = seen
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::RecoveryStarted { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1]);

        wait_for_state(&mut rx, MonitorState::Online, &mut seen).await;
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_emits_no_duplicate_transitions() {
        let probe = ScriptedProbe::new(&[], true);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone());
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        time::sleep(Duration::from_secs(35)).await;
        let seen = drain(&mut rx);

        assert_eq!(
            states(&seen),
            vec![MonitorState::Checking, MonitorState::Online]
        );
        let checks = seen
            .iter()
            .filter(|e| matches!(e, MonitorEvent::HealthChecked(_)))
            .count();
        assert_eq!(checks, 4);

        let health = monitor.health_status().unwrap();
        assert!(health.api);
        assert!(health.live_view);
        assert!(monitor.snapshot().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_unhealthy() {
        let probe = Arc::new(ScriptedProbe {
            script: Mutex::new(VecDeque::new()),
            fallback: AtomicBool::new(true),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        });
        let monitor = DccMonitor::new(MonitorConfig::default(), probe);
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Offline, &mut seen).await;

        let health = monitor.health_status().unwrap();
        assert!(!health.api);
        assert!(health.live_view);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_from_failed() {
        let probe = ScriptedProbe::new(&[], false);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone());
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Failed, &mut seen).await;

        probe.set(true);
        assert!(monitor.manual_retry());
        seen.clear();
        wait_for_state(&mut rx, MonitorState::Online, &mut seen).await;
        assert_eq!(
            states(&seen),
            vec![MonitorState::Checking, MonitorState::Online]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_ignored_while_online() {
        let probe = ScriptedProbe::new(&[], true);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone());
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Online, &mut seen).await;
        let polls = probe.calls.load(Ordering::SeqCst);

        assert!(!monitor.manual_retry());
        time::sleep(Duration::from_secs(1)).await;

        assert!(states(&drain(&mut rx)).is_empty());
        assert_eq!(probe.calls.load(Ordering::SeqCst), polls);
        assert_eq!(monitor.state(), MonitorState::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_cannot_bypass_backoff() {
        let probe = ScriptedProbe::new(&[], false);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe.clone());
        let mut rx = monitor.subscribe();

        monitor.start().unwrap();
        time::timeout(Duration::from_secs(120), async {
            while monitor.state() != MonitorState::Failed {
                assert!(!monitor.manual_retry());
                time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("breaker never opened");

        let attempts: Vec<u32> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::RecoveryStarted { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_listeners() {
        let probe = ScriptedProbe::new(&[], true);
        let monitor = DccMonitor::new(MonitorConfig::default(), probe);
        let mut rx = monitor.subscribe();
        let mut status = monitor.subscribe_status();

        monitor.start().unwrap();
        monitor.start().unwrap();
        let mut seen = Vec::new();
        wait_for_state(&mut rx, MonitorState::Online, &mut seen).await;

        monitor.stop().await;
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().state, MonitorState::Stopped);

        let rest = drain(&mut rx);
        assert_eq!(
            rest.last(),
            Some(&MonitorEvent::StateChanged {
                new: MonitorState::Stopped,
                old: MonitorState::Online,
            })
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        assert!(!monitor.manual_retry());
    }

    #[test]
    fn test_start_without_runtime() {
        let monitor = DccMonitor::new(MonitorConfig::default(), ScriptedProbe::new(&[], true));
        assert!(matches!(monitor.start(), Err(MonitorError::NoRuntime)));
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }
}
