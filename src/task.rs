//! The `enoki` task system.
//!
//! This module contains the in-memory representation of a spawned coroutine
//! (the [`Task`] type), its identity and lifecycle state, and the
//! thread-local used to reach the task currently switched in on the calling
//! worker thread.
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::ptr;

use crate::context::ExecutionContext;
use crate::wait::WaitKey;

/// A coroutine identifier.
///
/// Ids are assigned monotonically starting at 1 when a task is spawned.
/// [`TaskId::NONE`] (id 0) is reserved for "not in a coroutine" and is what
/// [`Scheduler::current_task_id`] reports from outside any task.
///
/// [`Scheduler::current_task_id`]: crate::scheduler::Scheduler::current_task_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// The id reported when the calling thread is not inside a coroutine.
    pub const NONE: Self = Self(0);

    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the id as a plain integer.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A task's lifecycle state.
///
/// Transitions happen under scheduler control only:
/// `Runnable → Running` on dispatch, `Running → Runnable` on yield,
/// `Running → Blocked` on any blocking call, `Running → Done` on closure
/// return, and `Blocked → Runnable` on a matching wakeup or I/O readiness.
/// `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued on the run queue, waiting to be dispatched.
    Runnable,
    /// Currently switched in on some worker thread.
    Running,
    /// Parked in the wait table or with the I/O driver.
    Blocked,
    /// The entry closure has returned; the task is about to be released.
    Done,
}

/// A blocking operation recorded by the running task, committed by the
/// worker thread after the task has switched out.
///
/// Parking in two phases closes the window in which a wakeup could observe
/// a task whose context is still live on another thread: the wakeup lands as
/// a pending unit (or early readiness) and is consumed at commit time.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BlockRequest {
    /// Park in the wait table under this key.
    Wait(WaitKey),
    /// Park with the I/O driver until `token` reports ready.
    Io { token: usize, fd: RawFd },
}

/// The parts of a task the running coroutine itself reaches through the
/// current-task thread-local.
///
/// Kept separate from the owned [`ExecutionContext`] so that in-task code
/// never touches the field the worker thread holds a mutable borrow of
/// while the context is switched in.
pub(crate) struct Header {
    id: TaskId,
    state: Cell<TaskState>,
    label: RefCell<String>,
    block: Cell<Option<BlockRequest>>,
}

impl Header {
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub(crate) fn set_label(&self, label: String) {
        *self.label.borrow_mut() = label;
    }

    pub(crate) fn label(&self) -> String {
        self.label.borrow().clone()
    }

    pub(crate) fn set_block_request(&self, req: BlockRequest) {
        self.block.set(Some(req));
    }

    pub(crate) fn take_block_request(&self) -> Option<BlockRequest> {
        self.block.take()
    }
}

/// A spawned coroutine: identity, state, debug label, and the owned
/// execution context its entry closure runs on.
pub(crate) struct Task {
    header: Header,
    ctx: ExecutionContext,
}

impl Task {
    pub(crate) fn new<F>(id: TaskId, stack_size: usize, entry: F) -> Box<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Box::new(Self {
            header: Header {
                id,
                state: Cell::new(TaskState::Runnable),
                label: RefCell::new(String::new()),
                block: Cell::new(None),
            },
            ctx: ExecutionContext::new(stack_size, entry),
        })
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn id(&self) -> TaskId {
        self.header.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.header.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.header.state.set(state);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.ctx.is_finished()
    }

    /// Resumes the task on the calling thread, publishing it as the
    /// thread's current task for the duration of the switch.
    ///
    /// Takes and returns the owning box so the worker's borrow of the
    /// execution context and the task's own view of its header are disjoint
    /// field projections rather than overlapping borrows of the whole task.
    pub(crate) fn resume(task: Box<Self>) -> Box<Self> {
        let raw = Box::into_raw(task);
        unsafe {
            CURRENT.with(|current| current.set(ptr::addr_of!((*raw).header)));
            let ctx = &mut *ptr::addr_of_mut!((*raw).ctx);
            ctx.switch_in();
            CURRENT.with(|current| current.set(ptr::null()));
            Box::from_raw(raw)
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.header.id)
            .field("state", &self.header.state.get())
            .field("label", &self.header.label.borrow())
            .finish_non_exhaustive()
    }
}

thread_local! {
    /// The header of the task currently switched in on this thread, or null.
    static CURRENT: Cell<*const Header> = const { Cell::new(ptr::null()) };
}

/// Accessors for the task currently running on the calling thread.
pub(crate) mod current {
    use super::{Header, TaskId, CURRENT};

    /// Runs `f` against the current task's header, or returns `None` when
    /// the calling thread is not inside a coroutine.
    ///
    /// The pointer is valid for the whole closure: it is published by the
    /// worker immediately before switching in and cleared immediately after
    /// the switch returns, and the worker owns the task for that entire
    /// span.
    pub(crate) fn with<R>(f: impl FnOnce(&Header) -> R) -> Option<R> {
        let ptr = CURRENT.with(|current| current.get());
        if ptr.is_null() {
            None
        } else {
            Some(f(unsafe { &*ptr }))
        }
    }

    /// Runs `f` against the current task's header for its side effect; does
    /// nothing when the calling thread is not inside a coroutine.
    pub(crate) fn update(f: impl FnOnce(&Header)) {
        let _ = with(f);
    }

    /// Whether the calling thread is currently executing inside a coroutine.
    pub(crate) fn is_set() -> bool {
        CURRENT.with(|current| !current.get().is_null())
    }

    /// The id of the current task, or [`TaskId::NONE`].
    pub(crate) fn id() -> TaskId {
        with(Header::id).unwrap_or(TaskId::NONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_integers() {
        assert_eq!(TaskId::new(7).to_string(), "7");
        assert_eq!(TaskId::NONE.as_u64(), 0);
    }

    #[test]
    fn no_current_task_outside_a_coroutine() {
        assert!(!current::is_set());
        assert_eq!(current::id(), TaskId::NONE);
    }
}
