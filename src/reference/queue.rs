//! Thread-safe delivery of cleared references
//!
//! A [`ReferenceQueue`] receives every reference bound to it at the moment
//! that reference is cleared. Consumers drain it from any thread, either
//! oldest-first or newest-first, or block with a deadline until an entry
//! shows up.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::handle::Reference;

/// Storage shared by all clones of a queue. References bind to it weakly.
pub(crate) struct QueueShared<T> {
    /// Pending references, oldest at the front
    entries: Mutex<VecDeque<Reference<T>>>,
    /// Signalled on every push
    available: Condvar,
    /// Mirror of `entries.len()` for lock-free emptiness hints
    queued: AtomicUsize,
    /// Total references ever pushed
    total_enqueued: AtomicUsize,
    /// Total references ever popped
    total_dequeued: AtomicUsize,
}

impl<T> QueueShared<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            queued: AtomicUsize::new(0),
            total_enqueued: AtomicUsize::new(0),
            total_dequeued: AtomicUsize::new(0),
        }
    }

    pub(crate) fn push(&self, reference: Reference<T>) {
        let mut entries = self.entries.lock();
        entries.push_back(reference);
        self.queued.store(entries.len(), Ordering::Release);
        drop(entries);

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    fn take(&self, entries: &mut VecDeque<Reference<T>>, end: End) -> Option<Reference<T>> {
        let reference = match end {
            End::Oldest => entries.pop_front(),
            End::Newest => entries.pop_back(),
        }?;
        self.queued.store(entries.len(), Ordering::Release);
        self.total_dequeued.fetch_add(1, Ordering::Relaxed);
        Some(reference)
    }

    fn pop(&self, end: End) -> Option<Reference<T>> {
        let mut entries = self.entries.lock();
        self.take(&mut entries, end)
    }
}

#[derive(Clone, Copy)]
enum End {
    Oldest,
    Newest,
}

/// Multi-producer, multi-consumer queue of cleared references.
///
/// Clones share the same underlying sequence. The queue is released once
/// every clone is dropped; bound references never keep it alive.
///
/// # Examples
///
/// ```
/// use refqueue::{Reference, ReferenceQueue};
/// use std::sync::Arc;
///
/// let queue = ReferenceQueue::new();
/// let first = Reference::hard(Arc::new(1u32), Some(&queue));
/// let second = Reference::hard(Arc::new(2u32), Some(&queue));
///
/// first.invalidate();
/// second.invalidate();
///
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.pop_newest(), Some(second));
/// assert_eq!(queue.pop_oldest(), Some(first));
/// assert!(queue.pop_oldest().is_none());
/// ```
pub struct ReferenceQueue<T> {
    shared: Arc<QueueShared<T>>,
}

impl<T> ReferenceQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared::new()),
        }
    }

    /// Append a reference; `None` is ignored
    pub fn push(&self, reference: impl Into<Option<Reference<T>>>) {
        if let Some(reference) = reference.into() {
            self.shared.push(reference);
        }
    }

    /// Remove and return the most recently pushed reference
    pub fn pop_newest(&self) -> Option<Reference<T>> {
        self.shared.pop(End::Newest)
    }

    /// Remove and return the earliest pushed reference
    pub fn pop_oldest(&self) -> Option<Reference<T>> {
        self.shared.pop(End::Oldest)
    }

    /// Wait up to `timeout` for a reference and return the oldest one.
    ///
    /// Returns `None` if nothing arrived before the deadline. A timeout too
    /// large for a deadline, such as `Duration::MAX`, waits without one.
    pub fn wait_oldest(&self, timeout: Duration) -> Option<Reference<T>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut entries = self.shared.entries.lock();
        loop {
            if let Some(reference) = self.shared.take(&mut entries, End::Oldest) {
                return Some(reference);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .available
                        .wait_until(&mut entries, deadline)
                        .timed_out()
                    {
                        return self.shared.take(&mut entries, End::Oldest);
                    }
                }
                None => self.shared.available.wait(&mut entries),
            }
        }
    }

    /// Remove every pending reference, oldest first
    pub fn drain(&self) -> Vec<Reference<T>> {
        let mut entries = self.shared.entries.lock();
        let drained: Vec<_> = entries.drain(..).collect();
        self.shared.queued.store(0, Ordering::Release);
        drop(entries);

        self.shared
            .total_dequeued
            .fetch_add(drained.len(), Ordering::Relaxed);
        drained
    }

    /// Advisory emptiness check.
    ///
    /// Read without the queue lock: a concurrent push or pop may change the
    /// answer before the caller acts on it.
    pub fn is_empty(&self) -> bool {
        self.shared.queued.load(Ordering::Acquire) == 0
    }

    /// Number of pending references
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Whether both handles refer to the same queue
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Get statistics for this queue
    pub fn stats(&self) -> ReferenceQueueStats {
        ReferenceQueueStats {
            total_enqueued: self.shared.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.shared.total_dequeued.load(Ordering::Relaxed),
            currently_queued: self.len(),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<QueueShared<T>> {
        Arc::downgrade(&self.shared)
    }
}

impl<T> Clone for ReferenceQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for ReferenceQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReferenceQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceQueue")
            .field("queued", &self.shared.queued.load(Ordering::Relaxed))
            .finish()
    }
}

/// Statistics for a reference queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceQueueStats {
    /// Total references pushed
    pub total_enqueued: usize,
    /// Total references popped or drained
    pub total_dequeued: usize,
    /// References waiting to be consumed
    pub currently_queued: usize,
}
