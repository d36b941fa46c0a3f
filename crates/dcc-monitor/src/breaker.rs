//! Recovery circuit breaker

use crate::config::MonitorConfig;
use std::time::Duration;
use tokio::time::Instant;

/// `min(max, initial * 2^(attempt-1))`; attempt is 1-based
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
}

/// Counts recovery attempts inside a time window
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    max_attempts: u32,
    window: Duration,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    attempts: u32,
    window_start: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_attempts: config.max_recovery_attempts,
            window: config.recovery_window(),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            attempts: 0,
            window_start: None,
        }
    }

    /// True when no further automatic recovery is allowed.
    /// A window older than the limit is forgiven first.
    pub fn is_open(&mut self, now: Instant) -> bool {
        if let Some(start) = self.window_start {
            if now.duration_since(start) > self.window {
                self.reset();
            }
        }
        self.attempts >= self.max_attempts
    }

    /// Count an attempt and return its backoff delay
    pub fn record_attempt(&mut self, now: Instant) -> (u32, Duration) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.attempts += 1;
        let delay = backoff_delay(self.attempts, self.initial_backoff_ms, self.max_backoff_ms);
        (self.attempts, delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.window_start = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
