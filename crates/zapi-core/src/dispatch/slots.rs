//! Concurrency slots shared by every query of a session.
//!
//! A query holds a slot only while one of its exchanges is open; it gives
//! the slot back before sleeping out a backoff, so other queries keep the
//! connection budget busy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct Counters {
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

/// Exactly `capacity` slots; acquisition waits when all are taken.
#[derive(Debug, Clone)]
pub struct SlotPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

/// A held slot. Released on drop.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.counters.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SlotPool {
    /// Create a pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            tracing::warn!("a slot pool needs at least one slot, using 1");
        }
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(Counters {
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.counters.in_use.load(Ordering::Acquire)
    }

    /// Free slots right now. May be 0 while every slot is held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Highest number of slots held at once since the pool was created.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::Acquire)
    }

    /// Wait for a free slot. Returns `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        Some(self.track(permit))
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Option<Slot> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.track(permit))
    }

    /// Stop handing out slots. Pending and future `acquire` calls return `None`;
    /// slots already held stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    fn track(&self, permit: OwnedSemaphorePermit) -> Slot {
        let now = self.counters.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters.peak.fetch_max(now, Ordering::AcqRel);
        Slot {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }
}
