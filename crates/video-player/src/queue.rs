//! Cancellable FIFO between the live extraction and decode stages.
//!
//! Items travel in the order they were produced. The queue has no hard capacity:
//! [`WorkQueue::put`] never blocks, and producers that want back-pressure call
//! [`WorkQueue::wait_for_room`] first.
//!
//! Shutdown goes through [`WorkQueue::cancel`], which is permanent and wakes every
//! waiter. After it, `get` returns `None` even when items are still queued.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Multi-producer/multi-consumer queue with a cancellation signal.
///
/// The `cancelled` flag sits under the same mutex as the items, so a consumer
/// can never miss the wakeup between checking the flag and starting to wait.
pub struct WorkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    /// Signalled when an item arrives or the queue is cancelled.
    items_cv: Condvar,
    /// Signalled when items leave the queue.
    room_cv: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                cancelled: false,
            }),
            items_cv: Condvar::new(),
            room_cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiting consumer.
    ///
    /// Once the queue is cancelled the item is dropped; returns `false` in that case.
    pub fn put(&self, item: T) -> bool {
        let mut g = self.lock();
        if g.cancelled {
            return false;
        }
        g.items.push_back(item);
        drop(g);
        self.items_cv.notify_one();
        true
    }

    /// Block until an item is available or the queue is cancelled.
    ///
    /// Returns `None` only for cancellation.
    pub fn get(&self) -> Option<T> {
        let mut g = self.lock();
        loop {
            if g.cancelled {
                return None;
            }
            if let Some(item) = g.items.pop_front() {
                drop(g);
                self.room_cv.notify_all();
                return Some(item);
            }
            g = self
                .items_cv
                .wait(g)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Mark the queue cancelled and wake all waiters. Idempotent.
    pub fn cancel(&self) {
        let mut g = self.lock();
        g.cancelled = true;
        drop(g);
        self.items_cv.notify_all();
        self.room_cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Drop every queued item without delivering it. Returns how many were dropped.
    pub fn flush(&self) -> usize {
        let mut g = self.lock();
        let dropped = g.items.len();
        g.items.clear();
        drop(g);
        self.room_cv.notify_all();
        dropped
    }

    /// Current number of queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Wait until fewer than `limit` items are queued.
    ///
    /// Returns `true` when there is room, `false` on cancellation or timeout.
    pub fn wait_for_room(&self, limit: usize, timeout: Duration) -> bool {
        let limit = limit.max(1);
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.cancelled {
                return false;
            }
            if g.items.len() < limit {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self
                .room_cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }
}
