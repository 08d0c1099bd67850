//! The two-level wait table underlying every blocking primitive.
//!
//! Each [`WaitKey`] names one counting semaphore: a pending-unit count plus
//! a FIFO queue of parked tasks. A wait either consumes a pending unit and
//! completes immediately or parks the caller; a wakeup unblocks queued
//! waiters in arrival order and accumulates whatever it could not hand out.
//! Entries live only while they have pending units or waiters, so the
//! table's memory is bounded by the number of active synchronization
//! relationships.
use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::task::Task;

/// The synchronization domain half of a [`WaitKey`].
///
/// Runtime-internal primitives and user-defined synchronization get
/// structurally distinct domains, so the two can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WaitDomain {
    /// Reserved for the runtime's built-in primitives.
    Internal(InternalDomain),
    /// Available to user-defined synchronization via the `user_block_*`
    /// scheduler operations.
    User(u32),
}

/// The built-in primitives' reserved domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum InternalDomain {
    /// `BlockObject` semaphores (and everything layered on them).
    Semaphore,
    /// The coroutine-aware `Mutex` handoff protocol.
    Mutex,
}

/// One synchronization relationship: a domain plus a wait id within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaitKey {
    pub(crate) domain: WaitDomain,
    pub(crate) wait_id: u64,
}

impl WaitKey {
    pub(crate) fn user(domain: u32, wait_id: u64) -> Self {
        Self {
            domain: WaitDomain::User(domain),
            wait_id,
        }
    }

    pub(crate) fn semaphore(wait_id: u64) -> Self {
        Self {
            domain: WaitDomain::Internal(InternalDomain::Semaphore),
            wait_id,
        }
    }

    pub(crate) fn mutex(wait_id: u64) -> Self {
        Self {
            domain: WaitDomain::Internal(InternalDomain::Mutex),
            wait_id,
        }
    }
}

/// A counting semaphore scoped to one [`WaitKey`].
#[derive(Default)]
struct WaitEntry {
    /// Wakeup units not yet absorbed by any waiter.
    pending: u32,
    /// Tasks parked on this key, in arrival order.
    waiters: VecDeque<Box<Task>>,
}

impl WaitEntry {
    fn is_empty(&self) -> bool {
        self.pending == 0 && self.waiters.is_empty()
    }
}

type Zone = HashMap<u64, WaitEntry>;

/// The domain → wait id → entry table.
pub(crate) struct WaitTable {
    zones: Mutex<HashMap<WaitDomain, Zone>>,
}

impl WaitTable {
    pub(crate) fn new() -> Self {
        Self {
            zones: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one pending unit if one is immediately available.
    ///
    /// Never blocks and has no side effect on failure; this is the entire
    /// non-blocking wait path.
    pub(crate) fn try_consume(&self, key: WaitKey) -> bool {
        let mut zones = self.zones.lock();
        let Some(zone) = zones.get_mut(&key.domain) else {
            return false;
        };
        let Some(entry) = zone.get_mut(&key.wait_id) else {
            return false;
        };
        if entry.pending == 0 {
            return false;
        }
        entry.pending -= 1;
        Self::prune(&mut zones, key);
        true
    }

    /// Commits a park for a task that has already switched out.
    ///
    /// If a wakeup raced in while the task was still switching out, its
    /// pending unit is consumed here and the task is handed back to the
    /// caller for immediate re-enqueue instead of being parked.
    pub(crate) fn park(&self, key: WaitKey, task: Box<Task>) -> Option<Box<Task>> {
        let mut zones = self.zones.lock();
        let entry = zones
            .entry(key.domain)
            .or_default()
            .entry(key.wait_id)
            .or_default();
        if entry.pending > 0 {
            entry.pending -= 1;
            Self::prune(&mut zones, key);
            return Some(task);
        }
        entry.waiters.push_back(task);
        None
    }

    /// Hands out `count` units: up to `count` queued waiters are unblocked
    /// in FIFO order and returned for re-enqueue; the remainder accumulates
    /// as pending units for future waits to consume.
    ///
    /// The second element is the number of units absorbed by waiters.
    pub(crate) fn wake(&self, key: WaitKey, count: u32) -> (Vec<Box<Task>>, u32) {
        let mut zones = self.zones.lock();
        let entry = zones
            .entry(key.domain)
            .or_default()
            .entry(key.wait_id)
            .or_default();
        let absorbed = (count as usize).min(entry.waiters.len()) as u32;
        let woken = entry.waiters.drain(..absorbed as usize).collect();
        entry.pending += count - absorbed;
        Self::prune(&mut zones, key);
        (woken, absorbed)
    }

    /// Discards any pending units left under `key`.
    ///
    /// Used when the primitive owning the key is dropped, so abandoned keys
    /// cannot pin table entries forever. The key must have no waiters.
    pub(crate) fn clear_pending(&self, key: WaitKey) {
        let mut zones = self.zones.lock();
        if let Some(entry) = zones.get_mut(&key.domain).and_then(|z| z.get_mut(&key.wait_id)) {
            debug_assert!(
                entry.waiters.is_empty(),
                "a wait key was abandoned with tasks still parked on it"
            );
            entry.pending = 0;
            Self::prune(&mut zones, key);
        }
    }

    /// The number of live entries across all domains.
    pub(crate) fn entry_count(&self) -> usize {
        self.zones.lock().values().map(HashMap::len).sum()
    }

    /// Removes `key`'s entry if it holds neither pending units nor waiters,
    /// and its zone once the zone is empty. Callers hold the table lock.
    fn prune(zones: &mut HashMap<WaitDomain, Zone>, key: WaitKey) {
        let Some(zone) = zones.get_mut(&key.domain) else {
            return;
        };
        if zone.get(&key.wait_id).is_some_and(WaitEntry::is_empty) {
            zone.remove(&key.wait_id);
        }
        if zone.is_empty() {
            zones.remove(&key.domain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_units_accumulate_and_drain() {
        let table = WaitTable::new();
        let key = WaitKey::user(7, 42);

        assert!(!table.try_consume(key));

        let (woken, absorbed) = table.wake(key, 3);
        assert!(woken.is_empty());
        assert_eq!(absorbed, 0);

        assert!(table.try_consume(key));
        assert!(table.try_consume(key));
        assert!(table.try_consume(key));
        assert!(!table.try_consume(key));
    }

    #[test]
    fn entries_are_pruned_once_idle() {
        let table = WaitTable::new();

        for wait_id in 0..1024 {
            let key = WaitKey::user(1, wait_id);
            table.wake(key, 2);
            assert!(table.try_consume(key));
            assert!(table.try_consume(key));
        }

        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn distinct_domains_do_not_collide() {
        let table = WaitTable::new();
        table.wake(WaitKey::user(3, 9), 1);

        assert!(!table.try_consume(WaitKey::user(4, 9)));
        assert!(!table.try_consume(WaitKey::semaphore(9)));
        assert!(!table.try_consume(WaitKey::mutex(9)));
        assert!(table.try_consume(WaitKey::user(3, 9)));
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn clear_pending_discards_leftover_units() {
        let table = WaitTable::new();
        let key = WaitKey::semaphore(1);

        table.wake(key, 5);
        assert_eq!(table.entry_count(), 1);

        table.clear_pending(key);
        assert_eq!(table.entry_count(), 0);
        assert!(!table.try_consume(key));
    }
}
