//! Capacity bound for the outbound frame queue.
//!
//! Frames are enqueued from any task through an
//! [`EngineHandle`](crate::engine::EngineHandle), but the queue itself lives
//! inside the engine task. [`QueueCapacity`] is the counter both sides
//! share: the handle reserves a slot before handing the frame over, and the
//! queue gives it back once the frame leaves (dispatched or discarded).
//!
//! Enqueueing never waits. A full queue fails with [`ZWaveError::QueueFull`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Result, ZWaveError};

/// Default queue capacity in frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Lock-free slot counter, cloned into every handle and the queue.
#[derive(Debug, Clone)]
pub struct QueueCapacity {
    reserved: Arc<AtomicUsize>,
    limit: usize,
}

impl QueueCapacity {
    pub fn new(limit: usize) -> Self {
        Self {
            reserved: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Frames currently holding a slot.
    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.reserved() >= self.limit
    }

    /// Take one slot, or fail with the current count when none is left.
    pub fn try_reserve(&self) -> Result<()> {
        let limit = self.limit;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .map(|_| ())
            .map_err(ZWaveError::QueueFull)
    }

    /// Give one slot back.
    #[inline]
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Give back the slots of a discarded queue. Never underflows.
    pub fn release_many(&self, count: usize) {
        let _ = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(count)));
    }
}

impl Default for QueueCapacity {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
