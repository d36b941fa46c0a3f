//! Write-completion debounce for newly created files

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Result of sampling a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    /// Size unchanged for the whole quiet period
    Stable,
    /// Still growing, or quiet period not yet over
    Pending,
    /// File disappeared before settling
    Gone,
}

#[derive(Debug)]
struct Entry {
    size: Option<u64>,
    last_change: Instant,
}

/// Tracks files created since the watch started until their size settles
#[derive(Debug)]
pub(crate) struct StabilityTracker {
    quiet: Duration,
    entries: HashMap<PathBuf, Entry>,
}

impl StabilityTracker {
    pub(crate) fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            entries: HashMap::new(),
        }
    }

    /// Start (or restart) tracking a new file
    pub(crate) fn track(&mut self, path: PathBuf, now: Instant) {
        self.entries.insert(
            path,
            Entry {
                size: None,
                last_change: now,
            },
        );
    }

    /// A write event arrived; only affects files already tracked
    pub(crate) fn touch(&mut self, path: &Path, now: Instant) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.last_change = now;
        }
    }

    pub(crate) fn forget(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the current size. Stable and gone files stop being tracked.
    pub(crate) fn observe(&mut self, path: &Path, size: Option<u64>, now: Instant) -> Observation {
        let Some(entry) = self.entries.get_mut(path) else {
            return Observation::Gone;
        };

        let observation = match size {
            None => Observation::Gone,
            Some(size) if entry.size != Some(size) => {
                entry.size = Some(size);
                entry.last_change = now;
                Observation::Pending
            }
            Some(_) if now.duration_since(entry.last_change) >= self.quiet => Observation::Stable,
            Some(_) => Observation::Pending,
        };

        if observation != Observation::Pending {
            self.entries.remove(path);
        }
        observation
    }
}
