//! FIFO queue of callers waiting for the next capture file

use crate::WatcherError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

type Reply = Result<PathBuf, WatcherError>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct QueueInner {
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

/// Shared between the watcher's event task and waiting callers
#[derive(Clone, Default)]
pub(crate) struct PendingQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl PendingQueue {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a waiter; the deadline starts now
    pub(crate) fn register(&self, timeout: Duration) -> PendingCapture {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.waiters.push_back(Waiter { id, tx });
        debug!(
            "Capture wait {} registered ({}ms), {} pending",
            id,
            timeout.as_millis(),
            inner.waiters.len()
        );

        PendingCapture {
            id,
            rx,
            deadline: Instant::now() + timeout,
            timeout_ms: timeout.as_millis() as u64,
            queue: self.clone(),
        }
    }

    /// Hand `path` to the oldest caller still waiting
    pub(crate) fn resolve_oldest(&self, path: &Path) -> bool {
        let mut inner = self.lock();
        while let Some(waiter) = inner.waiters.pop_front() {
            if waiter.tx.send(Ok(path.to_path_buf())).is_ok() {
                debug!("Resolved capture wait {} with {}", waiter.id, path.display());
                return true;
            }
        }
        false
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().waiters.retain(|w| w.id != id);
    }

    /// Fail every waiter; returns how many were still queued
    pub(crate) fn reject_all(&self, reason: impl Fn() -> WatcherError) -> usize {
        let waiters: Vec<Waiter> = self.lock().waiters.drain(..).collect();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(reason()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// A registered wait for the next capture file.
///
/// Registering before triggering the camera guarantees a file that appears
/// quickly is not missed. Dropping the handle leaves the queue.
pub struct PendingCapture {
    id: u64,
    rx: oneshot::Receiver<Reply>,
    deadline: Instant,
    timeout_ms: u64,
    queue: PendingQueue,
}

impl PendingCapture {
    /// Wait for the file, failing with `CaptureTimeout` at the deadline
    pub async fn wait(mut self) -> Result<PathBuf, WatcherError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(WatcherError::Stopped),
            Err(_) => {
                self.queue.remove(self.id);
                // A file may have been handed over right at the deadline
                if let Ok(reply) = self.rx.try_recv() {
                    return reply;
                }
                debug!("Capture wait {} timed out after {}ms", self.id, self.timeout_ms);
                Err(WatcherError::CaptureTimeout(self.timeout_ms))
            }
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        self.queue.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fifo_regardless_of_timeout() {
        let queue = PendingQueue::default();
        let a = queue.register(Duration::from_millis(10_000));
        let b = queue.register(Duration::from_millis(50));

        let a = tokio::spawn(a.wait());
        let b = tokio::spawn(b.wait());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.resolve_oldest(Path::new("/captures/s/IMG_0001.jpg")));

        assert_eq!(
            a.await.unwrap().unwrap(),
            PathBuf::from("/captures/s/IMG_0001.jpg")
        );
        assert!(matches!(
            b.await.unwrap(),
            Err(WatcherError::CaptureTimeout(50))
        ));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_waiter_is_skipped() {
        let queue = PendingQueue::default();
        let a = queue.register(Duration::from_millis(20));
        let b = queue.register(Duration::from_millis(1_000));

        assert!(matches!(a.wait().await, Err(WatcherError::CaptureTimeout(20))));
        let b = tokio::spawn(b.wait());
        tokio::task::yield_now().await;

        assert!(queue.resolve_oldest(Path::new("/captures/s/b.jpg")));
        assert_eq!(b.await.unwrap().unwrap(), PathBuf::from("/captures/s/b.jpg"));
    }

    #[tokio::test]
    async fn test_reject_all() {
        let queue = PendingQueue::default();
        let a = queue.register(Duration::from_secs(5));
        let b = queue.register(Duration::from_secs(5));
        assert_eq!(queue.reject_all(|| WatcherError::Stopped), 2);
        assert!(matches!(a.wait().await, Err(WatcherError::Stopped)));
        assert!(matches!(b.wait().await, Err(WatcherError::Stopped)));
    }

    #[test]
    fn test_drop_leaves_queue() {
        let queue = PendingQueue::default();
        let a = queue.register(Duration::from_secs(5));
        assert_eq!(queue.len(), 1);
        drop(a);
        assert_eq!(queue.len(), 0);
        assert!(!queue.resolve_oldest(Path::new("/captures/s/a.jpg")));
    }
}
