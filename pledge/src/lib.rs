//! Promises, futures and coroutines over a fixed worker pool.
//!
//! A [`Promise`] is the write end of a single-assignment cell and a [`Future`] its read
//! end. A value or an error is published once; the future is consumed once, by
//! blocking on it, by chaining a continuation onto it, or by awaiting it inside a
//! coroutine started with [`Scheduler::spawn`].
//!
//! ```rust
//! use pledge::{Promise, Scheduler};
//!
//! let scheduler = Scheduler::new(2).unwrap();
//! let mut promise = Promise::on(&scheduler);
//! let doubled = promise.get_future().unwrap().then(|x: u64| x * 2);
//!
//! scheduler.post(move || promise.set_value(21).unwrap()).unwrap();
//!
//! assert_eq!(doubled.get().unwrap(), 42);
//! scheduler.shutdown(true).unwrap();
//! ```
//!
//! Where a continuation runs is decided by the scheduler's [`ContinuationPolicy`]:
//! inline on the publishing thread, or posted to the pool.

mod loom;
mod state;

pub mod coroutine;
pub mod error;
pub mod future;
mod promise;
pub mod runtime;

pub use coroutine::{yield_now, Async, FrameId, FrameState};
pub use error::{Error, Exception};
pub use future::{block_on, Future};
pub use promise::Promise;
pub use runtime::{
  ContinuationPolicy, Scheduler, SchedulerBuilder, WorkerThreads,
};

pub use pledge_macros::{main, test};

#[doc(hidden)]
pub use pledge_macros::internal_test;
