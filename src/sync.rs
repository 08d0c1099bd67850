//! Synchronization primitives for coroutines.
//!
//! Everything in this module is built directly on the scheduler's
//! block-wait protocol: a blocked caller parks its *task*, never its OS
//! thread, so the worker keeps dispatching other tasks while it waits.
//!
//! - [`BlockObject`]: a standalone counting semaphore,
//! - [`Mutex`]: mutual exclusion whose contended path yields the coroutine,
//! - [`Channel`]: a typed bounded (or rendezvous) FIFO between coroutines.
pub mod block_object;
pub mod channel;
pub mod mutex;

pub use self::block_object::BlockObject;
pub use self::channel::Channel;
pub use self::mutex::{Mutex, MutexGuard};
