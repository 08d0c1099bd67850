//! The raw execution-context capability.
//!
//! Everything the rest of the runtime knows about stack switching lives
//! behind this module: allocate a stack, bind an entry function, switch into
//! a suspended computation, switch back out, and tear the stack down. The
//! scheduler consumes this as an opaque capability; no register or stack
//! manipulation is visible outside this boundary.
//!
//! The capability itself is provided per-platform by the [`generator`]
//! crate's stackful generators.
use std::panic::{self, AssertUnwindSafe};

use generator::{Generator, Gn};

/// One coroutine's suspended computation: a stack plus a register snapshot.
///
/// Switching in saves the caller's (scheduler's) register state and restores
/// the context's; [`switch_out`](Self::switch_out) does the reverse. Exactly
/// one thread may have a given context switched in at a time; the scheduler
/// upholds this by removing a task from the run queue before resuming it.
pub(crate) struct ExecutionContext {
    inner: Generator<'static, (), ()>,
}

// A suspended context may migrate between worker threads; the entry closure
// is `Send` and only one thread can have the context switched in at a time.
unsafe impl Send for ExecutionContext {}

impl ExecutionContext {
    /// Allocates a `stack_size`-byte stack and binds `entry` to it.
    ///
    /// The entry trampoline runs the closure and leaves the context finished
    /// when it returns. A panicking closure is caught at the trampoline and
    /// logged; panics never propagate across a switch boundary.
    pub(crate) fn new<F>(stack_size: usize, entry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = Gn::new_opt(stack_size, move || {
            if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
                tracing::error!("coroutine entry panicked; panic swallowed at the trampoline");
            }
            generator::done!();
        });
        Self { inner }
    }

    /// Switches the calling thread into this context.
    ///
    /// Returns when the computation yields, blocks, or finishes.
    pub(crate) fn switch_in(&mut self) {
        self.inner.resume();
    }

    /// Switches from the currently running context back to the scheduler
    /// context of the thread that resumed it.
    ///
    /// May only be called from inside a context that is currently switched
    /// in; the scheduler guards every call site with an in-coroutine check.
    pub(crate) fn switch_out() {
        generator::yield_with(());
    }

    /// Whether the entry closure has returned.
    pub(crate) fn is_finished(&self) -> bool {
        self.inner.is_done()
    }
}

// Dropping a still-suspended `Generator` unwinds its stack before releasing
// it, so an `ExecutionContext` needs no explicit destroy operation.
