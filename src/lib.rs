//! `enoki`: a stackful coroutine runtime.
//!
//! An M:N cooperative scheduler that multiplexes many lightweight,
//! stackful tasks across a pool of OS worker threads, plus the
//! synchronization primitives built directly on its block-wait protocol:
//! a counting [`BlockObject`], a coroutine-aware [`Mutex`], and a typed
//! bounded [`Channel`].
//!
//! # Model
//!
//! Tasks are spawned with [`Scheduler::spawn`] and run until they yield,
//! block, or finish; every suspension is a full execution-context switch
//! back to the worker thread's scheduler context. There is no preemption: a
//! task that never yields or blocks monopolizes its worker, and there is no
//! built-in cancellation or timeout — both are caller obligations.
//!
//! Worker threads drive the runtime by calling [`Scheduler::run_loop`] (or
//! [`Scheduler::run`] for one bounded batch at a time):
//!
//! ```
//! use enoki::{Scheduler, sync::Channel};
//!
//! let scheduler = Scheduler::new()?;
//! let channel = Channel::new(&scheduler, 4);
//!
//! let tx = channel.clone();
//! scheduler.spawn(move || {
//!     for i in 0..8 {
//!         tx.push(i);
//!     }
//! });
//!
//! let rx = channel.clone();
//! scheduler.spawn(move || {
//!     for i in 0..8 {
//!         assert_eq!(rx.pop(), i);
//!     }
//! });
//!
//! while !scheduler.is_empty() {
//!     scheduler.run();
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
#![warn(missing_docs)]

mod context;
mod wait;

pub mod io;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use self::io::IoInterest;
pub use self::scheduler::{Config, DebugFlags, Scheduler};
pub use self::sync::{BlockObject, Channel, Mutex};
pub use self::task::{TaskId, TaskState};
