//! A counting semaphore for coroutines.
use crate::scheduler::Scheduler;
use crate::wait::WaitKey;

/// A counting semaphore scoped to one reserved wait key.
///
/// A `BlockObject` holds a count of available units, seeded with the
/// capacity passed at construction. [`wait`](Self::wait) consumes one unit,
/// parking the calling coroutine when none is available; [`wakeup`]
/// (Self::wakeup) makes units available, unblocking parked waiters in the
/// order they arrived. Unabsorbed units accumulate for future waits.
///
/// This is the building block the [`Channel`](crate::sync::Channel) token
/// accounting is assembled from.
///
/// # Fairness
///
/// Waiters on one `BlockObject` are satisfied in first-in, first-out order.
/// No ordering is guaranteed across distinct objects.
pub struct BlockObject {
    scheduler: Scheduler,
    key: WaitKey,
}

// === impl BlockObject ===

impl BlockObject {
    /// Creates a semaphore with `capacity` units initially available.
    pub fn new(scheduler: &Scheduler, capacity: u32) -> Self {
        let key = WaitKey::semaphore(scheduler.alloc_wait_id());
        if capacity > 0 {
            scheduler.block_wakeup(key, capacity);
        }
        Self {
            scheduler: scheduler.clone(),
            key,
        }
    }

    /// Consumes one unit, parking the calling coroutine until one is
    /// available.
    ///
    /// Valid only inside a coroutine; called outside one this returns
    /// `false` and does nothing — callers of the blocking form must
    /// guarantee coroutine context.
    pub fn wait(&self) -> bool {
        self.scheduler.block_wait(self.key)
    }

    /// Consumes one unit iff one is immediately available.
    ///
    /// Never blocks and has no side effect on failure; safe to call from
    /// any context.
    pub fn try_wait(&self) -> bool {
        self.scheduler.try_block_wait(self.key)
    }

    /// Makes one unit available. See [`wakeup_n`](Self::wakeup_n).
    pub fn wakeup(&self) -> u32 {
        self.wakeup_n(1)
    }

    /// Makes `count` units available, immediately unblocking up to `count`
    /// parked waiters in FIFO order.
    ///
    /// Returns how many units were absorbed by unblocked waiters; the rest
    /// accumulate.
    pub fn wakeup_n(&self, count: u32) -> u32 {
        self.scheduler.block_wakeup(self.key, count)
    }
}

impl Drop for BlockObject {
    fn drop(&mut self) {
        // leftover units must not pin the wait-table entry once the
        // semaphore is gone.
        self.scheduler.clear_pending(self.key);
    }
}

impl std::fmt::Debug for BlockObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockObject").field("key", &self.key).finish()
    }
}
