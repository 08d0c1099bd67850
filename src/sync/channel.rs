//! A typed, bounded (or rendezvous) FIFO message queue between coroutines.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::scheduler::Scheduler;
use crate::sync::BlockObject;

/// A bounded, typed FIFO between coroutines.
///
/// A channel with capacity `C` buffers at most `C` items; capacity 0
/// denotes a *rendezvous* channel, where every push pairs with an
/// in-progress pop and nothing is ever buffered.
///
/// The implementation is two counting semaphores guarding a shared FIFO:
/// write tokens model empty slots (seeded with the capacity), read tokens
/// model filled slots (seeded with 0), and the FIFO itself sits behind its
/// own lock, independent of the token counts and of the scheduler's locks.
///
/// # Handles
///
/// `Channel` is a reference-counted handle over one shared instance:
/// cloning shares the same queue and tokens, and the instance lives as long
/// as the longest-lived handle. Clone freely into producer and consumer
/// tasks.
///
/// # Relaxed capacity accounting
///
/// The blocking pop path releases a write token *before* it dequeues, so a
/// waiting producer may run slightly ahead of the consumer's actual
/// removal. The buffer may therefore transiently hold one item above `C`
/// per in-progress pop; this is a deliberate latency trade, not a defect,
/// and the FIFO's own lock keeps the queue itself race-free. Strict
/// never-exceed-`C` accounting would move the wakeup after the dequeue.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    scheduler: Scheduler,
    /// Empty-slot tokens: seeded with the capacity.
    write_block: BlockObject,
    /// Filled-slot tokens: seeded with 0.
    read_block: BlockObject,
    queue: parking_lot::Mutex<VecDeque<T>>,
}

// === impl Channel ===

impl<T> Channel<T> {
    /// Creates a channel buffering at most `capacity` items; 0 makes it a
    /// rendezvous channel.
    pub fn new(scheduler: &Scheduler, capacity: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler: scheduler.clone(),
                write_block: BlockObject::new(scheduler, capacity),
                read_block: BlockObject::new(scheduler, 0),
                queue: parking_lot::Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Appends `value`, parking the calling coroutine while the channel is
    /// at capacity (for a rendezvous channel: until a pop is in progress).
    pub fn push(&self, value: T) {
        let inner = &*self.inner;
        inner.write_block.wait();
        inner.queue.lock().push_back(value);
        inner.read_block.wakeup();
    }

    /// Appends `value` iff an empty slot is immediately available,
    /// returning it back on failure. Never parks.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let inner = &*self.inner;
        if !inner.write_block.try_wait() {
            return Err(value);
        }
        inner.queue.lock().push_back(value);
        inner.read_block.wakeup();
        Ok(())
    }

    /// Removes and returns the front item, parking the calling coroutine
    /// until one is available.
    ///
    /// Items are delivered in push order. The write token is released
    /// eagerly, before the dequeue; see the type docs on relaxed capacity
    /// accounting.
    pub fn pop(&self) -> T {
        let inner = &*self.inner;
        inner.write_block.wakeup();
        inner.read_block.wait();
        inner
            .queue
            .lock()
            .pop_front()
            .expect("a consumed read token accounts for a buffered item")
    }

    /// Removes and returns the front item iff the channel is non-empty.
    ///
    /// Distinguishes "genuinely empty" from "a concurrent push is in
    /// flight": after probing for a read token, reclaiming the write token
    /// this call released proves no push is underway (empty), while failing
    /// to reclaim it means a producer absorbed it, so the call yields and
    /// probes again rather than report a transient empty.
    pub fn try_pop(&self) -> Option<T> {
        let inner = &*self.inner;
        inner.write_block.wakeup();
        loop {
            if inner.read_block.try_wait() {
                let value = inner
                    .queue
                    .lock()
                    .pop_front()
                    .expect("a consumed read token accounts for a buffered item");
                return Some(value);
            }
            if inner.write_block.try_wait() {
                return None;
            }
            inner.scheduler.yield_now();
        }
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("buffered", &self.inner.queue.lock().len())
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
