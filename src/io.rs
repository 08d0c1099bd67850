//! Readiness-notifier integration.
//!
//! The OS-level notifier is [`mio`] (epoll on Linux). A task that performs a
//! blocking I/O switch registers its file descriptor here, parks, and is
//! re-enqueued once the notifier reports the descriptor ready. Harvesting
//! happens from [`Scheduler::run`] with a zero-timeout poll, so readiness is
//! folded into ordinary dispatch without a dedicated reactor thread.
//!
//! [`Scheduler::run`]: crate::scheduler::Scheduler::run
use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::Mutex;

use crate::task::Task;

/// The readiness a task may block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoInterest {
    /// The descriptor has data to read.
    Readable,
    /// The descriptor can accept writes.
    Writable,
}

impl From<IoInterest> for Interest {
    fn from(interest: IoInterest) -> Self {
        match interest {
            IoInterest::Readable => Interest::READABLE,
            IoInterest::Writable => Interest::WRITABLE,
        }
    }
}

/// A task parked on readiness, remembered so the registration can be torn
/// down when it fires.
struct Parked {
    fd: RawFd,
    task: Box<Task>,
}

struct Poller {
    poll: Poll,
    events: Events,
}

pub(crate) struct IoDriver {
    registry: Registry,
    poller: Mutex<Poller>,
    /// token → parked task, inserted by the worker committing an I/O park.
    parked: Mutex<HashMap<usize, Parked>>,
    /// Tokens whose readiness fired before the park was committed.
    ready_early: Mutex<HashSet<usize>>,
    next_token: AtomicUsize,
}

impl IoDriver {
    pub(crate) fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            registry,
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(64),
            }),
            parked: Mutex::new(HashMap::new()),
            ready_early: Mutex::new(HashSet::new()),
            next_token: AtomicUsize::new(0),
        })
    }

    /// Registers `fd` with the notifier, returning the token the eventual
    /// readiness event will carry.
    ///
    /// This is the fallible half of an I/O block switch and runs in-task,
    /// before the caller parks; an error here means the task keeps running.
    pub(crate) fn register(&self, fd: RawFd, interest: IoInterest) -> io::Result<usize> {
        let token = self.next_token.fetch_add(1, Relaxed);
        self.registry
            .register(&mut SourceFd(&fd), Token(token), interest.into())?;
        Ok(token)
    }

    /// Commits the park for a task that has switched out after registering.
    ///
    /// If the readiness event already fired, the registration is torn down
    /// and the task handed back for immediate re-enqueue.
    pub(crate) fn park(&self, token: usize, fd: RawFd, task: Box<Task>) -> Option<Box<Task>> {
        // lock order: parked before ready_early, same as harvest().
        let mut parked = self.parked.lock();
        if self.ready_early.lock().remove(&token) {
            self.deregister(fd);
            return Some(task);
        }
        parked.insert(token, Parked { fd, task });
        None
    }

    /// Polls the notifier without blocking and returns every task whose
    /// readiness arrived, registration already torn down.
    ///
    /// Only one worker harvests at a time; the rest skip past.
    pub(crate) fn harvest(&self) -> Vec<Box<Task>> {
        let Some(mut poller) = self.poller.try_lock() else {
            return Vec::new();
        };
        let Poller { poll, events } = &mut *poller;
        if let Err(error) = poll.poll(events, Some(Duration::ZERO)) {
            if error.kind() != io::ErrorKind::Interrupted {
                tracing::warn!(%error, "readiness poll failed");
            }
            return Vec::new();
        }

        let mut woken = Vec::new();
        let mut parked = self.parked.lock();
        for event in events.iter() {
            let token = event.token().0;
            match parked.remove(&token) {
                Some(entry) => {
                    self.deregister(entry.fd);
                    woken.push(entry.task);
                }
                // Fired between registration and park commit; remember it
                // so the commit completes the wakeup instead of parking.
                None => {
                    self.ready_early.lock().insert(token);
                }
            }
        }
        woken
    }

    fn deregister(&self, fd: RawFd) {
        if let Err(error) = self.registry.deregister(&mut SourceFd(&fd)) {
            tracing::warn!(fd, %error, "failed to deregister descriptor");
        }
    }
}
