//! A mutual exclusion lock whose contended path blocks the coroutine, not
//! the OS thread.
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::scheduler::Scheduler;
use crate::wait::WaitKey;

/// A coroutine-aware [mutual exclusion lock][mutex] protecting shared data.
///
/// When the lock is held, [`lock`] parks the calling *coroutine* over the
/// runtime's reserved mutex wait domain and lets the worker thread keep
/// dispatching other tasks; a blocking mutex would stall the whole worker.
///
/// The data can only be reached through the [RAII guard] returned from
/// [`lock`] and [`try_lock`], so the lock is released on every exit path,
/// including early return and panic unwinding inside the critical section.
///
/// # Fairness
///
/// Release hands the lock directly to the longest-waiting coroutine, if
/// any: the held flag stays set across the handoff and the woken waiter
/// owns the lock the moment it resumes. Waiters acquire in first-in,
/// first-out order.
///
/// Contended acquisition must happen inside a coroutine. As a safety net, a
/// contended `lock` from outside one falls back to spinning on the OS
/// thread instead of corrupting the handoff protocol.
///
/// [mutex]: https://en.wikipedia.org/wiki/Mutual_exclusion
/// [RAII guard]: MutexGuard
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct Mutex<T: ?Sized> {
    scheduler: Scheduler,
    key: WaitKey,
    state: parking_lot::Mutex<State>,
    data: UnsafeCell<T>,
}

struct State {
    held: bool,
    /// Coroutines parked (or about to park) on the wait key.
    waiters: u32,
}

/// An RAII scoped-lock guard for a [`Mutex`].
///
/// The protected data is reached through this guard's [`Deref`] and
/// [`DerefMut`] implementations; dropping it releases the lock, handing off
/// to the next waiter if one is parked.
#[must_use = "if unused, the Mutex will immediately unlock"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

// === impl Mutex ===

impl<T> Mutex<T> {
    /// Creates a mutex protecting `data`, unlocked.
    pub fn new(scheduler: &Scheduler, data: T) -> Self {
        Self {
            scheduler: scheduler.clone(),
            key: WaitKey::mutex(scheduler.alloc_wait_id()),
            state: parking_lot::Mutex::new(State {
                held: false,
                waiters: 0,
            }),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, parking the calling coroutine while it is held
    /// elsewhere.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            {
                let mut state = self.state.lock();
                if !state.held {
                    state.held = true;
                    return MutexGuard { mutex: self };
                }
                if self.scheduler.is_coroutine() {
                    state.waiters += 1;
                    drop(state);
                    // the releasing side keeps `held` set and hands the
                    // lock to us; when the wait returns we own it.
                    self.scheduler.block_wait(self.key);
                    return MutexGuard { mutex: self };
                }
            }
            // contended acquisition outside a coroutine: spin on the OS
            // thread rather than park a task that does not exist.
            std::thread::yield_now();
        }
    }

    /// Acquires the lock iff it is not currently held. Never blocks.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.held {
            None
        } else {
            state.held = true;
            Some(MutexGuard { mutex: self })
        }
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        if state.waiters > 0 {
            // direct handoff: `held` stays set for the woken waiter.
            state.waiters -= 1;
            drop(state);
            self.scheduler.block_wakeup(self.key, 1);
        } else {
            state.held = false;
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("data", &&*guard),
            None => s.field("data", &format_args!("<locked>")),
        };
        s.finish()
    }
}

// === impl MutexGuard ===

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // the held flag guarantees exclusive access for the guard's
        // lifetime.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
