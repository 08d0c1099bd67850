//! The `enoki` scheduler.
//!
//! A [`Scheduler`] multiplexes any number of cooperatively scheduled tasks
//! over however many OS worker threads call [`run_loop`]. It owns the run
//! queue, the [wait table] keyed by synchronization domain, and the
//! [readiness driver], and is the only component that moves tasks between
//! the runnable, blocked, and done states.
//!
//! The scheduler is an explicitly constructed, cloneable handle — there is
//! no process-wide instance. Worker threads, tasks, and synchronization
//! primitives each hold their own clone of the handle.
//!
//! [`run_loop`]: Scheduler::run_loop
//! [wait table]: crate::wait
//! [readiness driver]: crate::io
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{
    AtomicBool, AtomicU64, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::ExecutionContext;
use crate::io::{IoDriver, IoInterest};
use crate::task::{current, BlockRequest, Task, TaskId, TaskState};
use crate::wait::{WaitKey, WaitTable};

bitflags::bitflags! {
    /// Diagnostic categories. Each set bit makes the scheduler emit
    /// `tracing` events for the corresponding category.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u64 {
        /// Blocking-call interception.
        const HOOK      = 1;
        /// Cooperative yields.
        const YIELD     = 1 << 1;
        /// Dispatch batches.
        const SCHEDULER = 1 << 2;
        /// Task creation and completion.
        const TASK      = 1 << 3;
        /// Context switches in and out of tasks.
        const SWITCH    = 1 << 4;
        /// I/O readiness registration and wakeups.
        const IO_BLOCK  = 1 << 5;
        /// Wait-table parks and wakeups.
        const WAIT      = 1 << 6;
    }
}

/// Scheduler configuration, applied at construction.
///
/// `stack_size` may also be adjusted later through
/// [`Scheduler::set_stack_size`]; the change affects only tasks created
/// afterward.
#[derive(Debug, Clone)]
pub struct Config {
    /// Which diagnostic categories are emitted. Empty by default.
    pub debug: DebugFlags,
    /// Bytes allocated for each newly created task's stack.
    pub stack_size: usize,
    /// Divisor controlling how many runnable tasks one [`Scheduler::run`]
    /// call drains relative to the total task count.
    pub chunk_count: usize,
    /// Hard upper bound on tasks drained per [`Scheduler::run`] call.
    pub max_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: DebugFlags::empty(),
            stack_size: 128 * 1024,
            chunk_count: 128,
            max_chunk_size: 128,
        }
    }
}

/// Emits a `tracing` event when the corresponding diagnostic category is
/// enabled in the scheduler's configuration.
macro_rules! dbg_trace {
    ($core:expr, $flag:ident, $($arg:tt)+) => {
        if $core.debug.contains(DebugFlags::$flag) {
            tracing::trace!($($arg)+);
        }
    };
}

/// A cloneable handle to a coroutine scheduler.
///
/// All clones refer to the same run queue, wait table, and readiness
/// driver; the scheduler shuts down when [`stop`](Self::stop) is called and
/// is released when the last handle is dropped.
#[derive(Clone)]
pub struct Scheduler(Arc<Core>);

struct Core {
    debug: DebugFlags,
    stack_size: AtomicUsize,
    chunk_count: usize,
    max_chunk_size: usize,

    run_queue: Mutex<VecDeque<Box<Task>>>,
    wait_table: WaitTable,
    io: IoDriver,

    next_task_id: AtomicU64,
    next_wait_id: AtomicU64,
    task_count: AtomicUsize,
    running: AtomicBool,
}

// === impl Scheduler ===

impl Scheduler {
    /// Creates a scheduler with the default [`Config`].
    ///
    /// Fails only if the OS readiness notifier cannot be created.
    pub fn new() -> io::Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates a scheduler with the given [`Config`].
    pub fn with_config(config: Config) -> io::Result<Self> {
        Ok(Self(Arc::new(Core {
            debug: config.debug,
            stack_size: AtomicUsize::new(config.stack_size),
            chunk_count: config.chunk_count.max(1),
            max_chunk_size: config.max_chunk_size.max(1),
            run_queue: Mutex::new(VecDeque::new()),
            wait_table: WaitTable::new(),
            io: IoDriver::new()?,
            next_task_id: AtomicU64::new(1),
            next_wait_id: AtomicU64::new(1),
            task_count: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        })))
    }

    /// Creates a task running `f` and enqueues it runnable.
    ///
    /// The new task's stack is sized per the current configuration. Its id
    /// is not observable from the outside; the task itself can read it via
    /// [`current_task_id`](Self::current_task_id).
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let core = &*self.0;
        let id = TaskId::new(core.next_task_id.fetch_add(1, Relaxed));
        let stack_size = core.stack_size.load(Relaxed);
        let task = Task::new(id, stack_size, f);
        core.task_count.fetch_add(1, Relaxed);
        dbg_trace!(core, TASK, task.id = %id, task.stack_size = stack_size, "task created");
        core.enqueue(task);
    }

    /// Whether the calling thread is currently executing inside a task.
    pub fn is_coroutine(&self) -> bool {
        current::is_set()
    }

    /// Cooperatively suspends the calling task, re-enqueueing it runnable.
    ///
    /// A no-op when called outside a coroutine.
    pub fn yield_now(&self) {
        if !current::is_set() {
            return;
        }
        dbg_trace!(self.0, YIELD, task.id = %current::id(), "yield");
        // the worker re-enqueues runnable tasks after the switch out.
        current::update(|header| header.set_state(TaskState::Runnable));
        ExecutionContext::switch_out();
    }

    /// Dispatches one bounded batch of runnable tasks on the calling
    /// thread, returning how many tasks were processed.
    ///
    /// The batch size is `clamp(task_count / chunk_count, 1,
    /// max_chunk_size)`, which bounds per-call latency while scaling
    /// throughput with the total task count. Must be called from outside a
    /// coroutine; from inside one it does nothing and returns 0.
    pub fn run(&self) -> usize {
        let core = &*self.0;
        if current::is_set() {
            debug_assert!(false, "Scheduler::run called from inside a coroutine");
            return 0;
        }

        for task in core.io.harvest() {
            dbg_trace!(core, IO_BLOCK, task.id = %task.id(), "io ready");
            core.enqueue(task);
        }

        let batch = core.batch_size();
        let mut processed = 0;
        while processed < batch {
            let Some(task) = core.run_queue.lock().pop_front() else {
                break;
            };
            self.dispatch(task);
            processed += 1;
        }
        if processed > 0 {
            dbg_trace!(core, SCHEDULER, processed, batch, "run");
        }
        processed
    }

    /// Calls [`run`](Self::run) until [`stop`](Self::stop); a worker
    /// thread's main loop.
    pub fn run_loop(&self) {
        while self.is_running() {
            if self.run() == 0 {
                std::thread::yield_now();
            }
        }
        dbg_trace!(self.0, SCHEDULER, "stop signal received, worker exiting");
    }

    /// Makes every [`run_loop`](Self::run_loop) worker return. Idempotent.
    pub fn stop(&self) {
        self.0.running.store(false, Release);
    }

    /// Whether [`stop`](Self::stop) has not yet been called.
    pub fn is_running(&self) -> bool {
        self.0.running.load(Acquire)
    }

    /// The current total number of live tasks.
    ///
    /// An eventually-consistent snapshot under concurrent mutation.
    pub fn task_count(&self) -> usize {
        self.0.task_count.load(Relaxed)
    }

    /// The current number of runnable (queued) tasks.
    pub fn runnable_task_count(&self) -> usize {
        self.0.run_queue.lock().len()
    }

    /// Whether no tasks remain.
    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }

    /// The number of live wait-table entries, for diagnostics.
    pub fn wait_entry_count(&self) -> usize {
        self.0.wait_table.entry_count()
    }

    /// The id of the task executing on the calling thread, or
    /// [`TaskId::NONE`] when called outside a coroutine.
    pub fn current_task_id(&self) -> TaskId {
        current::id()
    }

    /// Attaches a diagnostic label to the calling task, echoed by
    /// [`current_task_debug_info`](Self::current_task_debug_info). A no-op
    /// outside a coroutine.
    pub fn set_current_task_debug_info(&self, label: impl Into<String>) {
        current::update(|header| header.set_label(label.into()));
    }

    /// The calling task's diagnostic label together with its id, or `None`
    /// outside a coroutine.
    pub fn current_task_debug_info(&self) -> Option<String> {
        current::with(|header| {
            let label = header.label();
            if label.is_empty() {
                format!("task {}", header.id())
            } else {
                format!("{label} (task {})", header.id())
            }
        })
    }

    /// Adjusts the stack size for tasks created after this call.
    pub fn set_stack_size(&self, bytes: usize) {
        self.0.stack_size.store(bytes, Relaxed);
    }

    /// Registers `fd` for `interest` with the readiness notifier and parks
    /// the calling task until the notifier reports it ready.
    ///
    /// Returns `false` without parking if registration fails or if called
    /// outside a coroutine; the caller must then fall back to a synchronous
    /// strategy.
    pub fn io_block_switch(&self, fd: RawFd, interest: IoInterest) -> bool {
        if !current::is_set() {
            return false;
        }
        let core = &*self.0;
        let token = match core.io.register(fd, interest) {
            Ok(token) => token,
            Err(error) => {
                dbg_trace!(core, IO_BLOCK, fd, %error, "registration failed, continuing");
                return false;
            }
        };
        dbg_trace!(core, IO_BLOCK, task.id = %current::id(), fd, token, "io block");
        current::update(|header| {
            header.set_block_request(BlockRequest::Io { token, fd });
            header.set_state(TaskState::Blocked);
        });
        ExecutionContext::switch_out();
        true
    }

    /// Blocks the calling coroutine on a user-defined wait key until a unit
    /// is available, consuming one.
    ///
    /// Completes immediately when a pending unit is already available.
    /// Returns `false`, doing nothing, when called outside a coroutine.
    pub fn user_block_wait(&self, domain: u32, wait_id: u64) -> bool {
        self.block_wait(WaitKey::user(domain, wait_id))
    }

    /// Consumes a pending unit from a user-defined wait key iff one is
    /// immediately available. Never blocks; safe to call from any context.
    pub fn try_user_block_wait(&self, domain: u32, wait_id: u64) -> bool {
        self.try_block_wait(WaitKey::user(domain, wait_id))
    }

    /// Hands out `count` units on a user-defined wait key, unblocking up to
    /// `count` queued waiters in FIFO order.
    ///
    /// Returns the number of units absorbed by immediately unblocked
    /// waiters; the rest accumulate for future waits to consume.
    pub fn user_block_wakeup(&self, domain: u32, wait_id: u64, count: u32) -> u32 {
        self.block_wakeup(WaitKey::user(domain, wait_id), count)
    }

    // === the block-wait protocol, shared with the built-in primitives ===

    pub(crate) fn block_wait(&self, key: WaitKey) -> bool {
        if !current::is_set() {
            return false;
        }
        let core = &*self.0;
        if core.wait_table.try_consume(key) {
            return true;
        }
        dbg_trace!(core, WAIT, task.id = %current::id(), ?key, "block wait");
        // two-phase park: record the key here, commit in the worker after
        // the switch out (see `dispatch`).
        current::update(|header| {
            header.set_block_request(BlockRequest::Wait(key));
            header.set_state(TaskState::Blocked);
        });
        ExecutionContext::switch_out();
        true
    }

    pub(crate) fn try_block_wait(&self, key: WaitKey) -> bool {
        self.0.wait_table.try_consume(key)
    }

    pub(crate) fn block_wakeup(&self, key: WaitKey, count: u32) -> u32 {
        let core = &*self.0;
        let (woken, absorbed) = core.wait_table.wake(key, count);
        dbg_trace!(core, WAIT, ?key, count, absorbed, "wakeup");
        for task in woken {
            core.enqueue(task);
        }
        absorbed
    }

    /// Allocates a wait id unique across the built-in primitives of this
    /// scheduler.
    pub(crate) fn alloc_wait_id(&self) -> u64 {
        self.0.next_wait_id.fetch_add(1, Relaxed)
    }

    /// Discards pending units left under `key` by a dropped primitive.
    pub(crate) fn clear_pending(&self, key: WaitKey) {
        self.0.wait_table.clear_pending(key);
    }

    /// Resumes one task and routes it by the state it switched out in.
    fn dispatch(&self, task: Box<Task>) {
        let core = &*self.0;
        task.set_state(TaskState::Running);
        dbg_trace!(core, SWITCH, task.id = %task.id(), "switch in");
        let task = Task::resume(task);
        dbg_trace!(core, SWITCH, task.id = %task.id(), task.state = ?task.state(), "switch out");

        if task.is_finished() {
            core.task_count.fetch_sub(1, Relaxed);
            dbg_trace!(core, TASK, task.id = %task.id(), "task done");
            // dropping the task releases its stack.
            return;
        }

        match task.state() {
            TaskState::Runnable | TaskState::Running => core.enqueue(task),
            TaskState::Blocked => match task.header().take_block_request() {
                Some(BlockRequest::Wait(key)) => {
                    if let Some(task) = core.wait_table.park(key, task) {
                        // a wakeup landed while the task was switching out.
                        core.enqueue(task);
                    }
                }
                Some(BlockRequest::Io { token, fd }) => {
                    if let Some(task) = core.io.park(token, fd, task) {
                        core.enqueue(task);
                    }
                }
                None => {
                    debug_assert!(false, "blocked task recorded no block request");
                    core.enqueue(task);
                }
            },
            TaskState::Done => unreachable!("finished tasks are released above"),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("task_count", &self.task_count())
            .field("runnable_task_count", &self.runnable_task_count())
            .field("wait_entry_count", &self.wait_entry_count())
            .field("is_running", &self.is_running())
            .finish()
    }
}

// === impl Core ===

impl Core {
    fn enqueue(&self, task: Box<Task>) {
        task.set_state(TaskState::Runnable);
        self.run_queue.lock().push_back(task);
    }

    fn batch_size(&self) -> usize {
        let tasks = self.task_count.load(Relaxed);
        (tasks / self.chunk_count).clamp(1, self.max_chunk_size)
    }
}
