use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex, RwLock};

/// Last write sequence fully incorporated by one index.
///
/// Advanced only by the index's own worker; readers either sample it or
/// block on it until a target sequence is reached.
pub struct StalenessMarker {
    indexed: AtomicU64,
    lock: Mutex<()>,
    advanced: Condvar,
}

impl Default for StalenessMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl StalenessMarker {
    pub fn new() -> Self {
        StalenessMarker {
            indexed: AtomicU64::new(0),
            lock: Mutex::new(()),
            advanced: Condvar::new(),
        }
    }

    pub fn current(&self) -> u64 {
        self.indexed.load(Ordering::Acquire)
    }

    /// Move forward to `sequence`. Never moves backwards.
    pub fn advance(&self, sequence: u64) {
        let _guard = self.lock.lock();
        if self.indexed.fetch_max(sequence, Ordering::AcqRel) < sequence {
            self.advanced.notify_all();
        }
    }

    /// Restart from zero (index reset). Waiters keep waiting for their target.
    pub fn reset(&self) {
        let _guard = self.lock.lock();
        self.indexed.store(0, Ordering::Release);
    }

    /// Block until the marker reaches `target` or `timeout` elapses.
    /// Returns the marker value seen last; a timed-out caller gets a value below `target`.
    pub fn wait_until(&self, target: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            let current = self.current();
            if current >= target {
                return current;
            }
            if self.advanced.wait_until(&mut guard, deadline).timed_out() {
                return self.current();
            }
        }
    }
}

/// Point-in-time view publication: writers swap in a new `Arc`, readers keep
/// whichever snapshot they cloned for as long as they need it.
pub struct SnapshotCell<T> {
    current: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(initial: T) -> Self {
        SnapshotCell {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.current.read().clone()
    }

    pub fn publish(&self, snapshot: T) {
        *self.current.write() = Arc::new(snapshot);
    }
}
