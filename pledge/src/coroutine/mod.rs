//! Coroutine frames driven by a [`Scheduler`](crate::Scheduler).
//!
//! Any `async` block can become a coroutine through [`Scheduler::spawn`]. Inside it,
//! `.await` on a [`Future`] that is already resolved continues without suspending;
//! otherwise the frame is suspended and its resume handle is installed as the future's
//! continuation. Publishing the value resumes the frame on a thread picked by the
//! scheduler's [`ContinuationPolicy`](crate::ContinuationPolicy).
//!
//! ```no_run
//! use pledge::{Promise, Scheduler};
//!
//! let scheduler = Scheduler::new(2).unwrap();
//! let (mut promise, future) = Promise::<u32>::pair();
//!
//! let coroutine = scheduler
//!   .spawn(async move { future.await.map(|value| value * 2) })
//!   .unwrap();
//!
//! promise.set_value(21).unwrap();
//! assert_eq!(coroutine.get().unwrap().unwrap(), 42);
//! scheduler.shutdown(true).unwrap();
//! ```
//!
//! [`Scheduler::spawn`]: crate::Scheduler::spawn

mod frame;
mod waker;
mod yield_now;

use std::{
  fmt,
  future::Future as StdFuture,
  pin::Pin,
  sync::{Arc, Weak},
  task::{Context, Poll},
};

use tracing::trace;

pub use frame::{FrameId, FrameState};
pub(crate) use frame::{resume_task, Frames};
pub use yield_now::{yield_now, YieldNow};

use crate::{
  error::Error,
  future::{self, Future},
  runtime::{is_worker_thread, SchedulerInner},
  state::Executor,
  Promise,
};
use frame::{Body, Frame};

pub(crate) fn spawn<F>(
  scheduler: &Arc<SchedulerInner>,
  future: F,
) -> Result<Async<F::Output>, Error>
where
  F: StdFuture + Send + 'static,
  F::Output: Send + 'static,
{
  if scheduler.is_stopped() {
    return Err(Error::SchedulerStopped);
  }

  let handle = Arc::downgrade(scheduler);
  let (promise, output) = Promise::pair_with(Executor::Pool(handle.clone()));
  let frame = scheduler.frames.insert(Box::pin(Body::new(future, promise)));
  let id = frame.id();

  if scheduler.try_post(resume_task(handle.clone(), id)).is_err() {
    scheduler.frames.cancel(id);
    return Err(Error::SchedulerStopped);
  }

  trace!(%id, "coroutine spawned");
  Ok(Async { frame, scheduler: handle, output: Some(output) })
}

/// Handle to a coroutine frame and to the value it will `return`.
///
/// Awaiting the handle (from another coroutine) or calling [`Async::get`] yields the
/// body's output, or [`Error::Panicked`] when the body panicked. Dropping the handle
/// before completion cancels the frame: the body is destroyed, its pending continuation
/// is deregistered, and a wake that is already in flight finds nothing to resume.
#[must_use = "dropping an Async cancels the coroutine; use `detach` to let it run"]
pub struct Async<T: Send + 'static> {
  frame: Arc<Frame>,
  scheduler: Weak<SchedulerInner>,
  output: Option<Future<T>>,
}

impl<T: Send + 'static> Async<T> {
  pub fn id(&self) -> FrameId {
    self.frame.id()
  }

  pub fn state(&self) -> FrameState {
    self.frame.state()
  }

  pub fn is_finished(&self) -> bool {
    self.state().is_final()
  }

  /// Blocks the calling thread until the coroutine returns.
  ///
  /// Fails with [`Error::SelfBlockingWait`] on a worker thread if the result is not in
  /// yet; the coroutine is then cancelled along with the handle.
  pub fn get(mut self) -> Result<T, Error> {
    if let Some(result) = self.output.as_mut().and_then(Future::try_get) {
      return result;
    }
    if is_worker_thread() {
      return Err(Error::SelfBlockingWait);
    }

    future::block_on(&mut self)
  }

  /// Destroys the frame now. Equivalent to dropping the handle.
  pub fn cancel(self) {
    drop(self)
  }

  /// Lets the coroutine run to completion without a handle and returns its output future.
  pub fn detach(mut self) -> Future<T> {
    match self.output.take() {
      Some(output) => output,
      None => Future::failed(Error::FutureAlreadyRetrieved),
    }
  }
}

impl<T: Send + 'static> StdFuture for Async<T> {
  type Output = Result<T, Error>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match self.output.as_mut() {
      Some(output) => Pin::new(output).poll(cx),
      None => Poll::Ready(Err(Error::FutureAlreadyRetrieved)),
    }
  }
}

impl<T: Send + 'static> Drop for Async<T> {
  fn drop(&mut self) {
    if self.output.is_none() {
      return;
    }

    match self.scheduler.upgrade() {
      Some(scheduler) => scheduler.frames.cancel(self.frame.id()),
      None => self.frame.cancel(),
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Async<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Async")
      .field("id", &self.id())
      .field("state", &self.state())
      .finish()
  }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Async<u8>: Send, Sync);

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Scheduler;

  #[crate::internal_test]
  async fn awaits_ready_future_without_suspending(scheduler: Scheduler) {
    let coroutine = scheduler
      .spawn(async { Future::ready(5u8).await.unwrap() + 1 })
      .unwrap();

    assert_eq!(coroutine.await.unwrap(), 6);
  }

  #[crate::internal_test]
  async fn yield_now_resumes(scheduler: Scheduler) {
    let coroutine = scheduler
      .spawn(async {
        for _ in 0..3 {
          yield_now().await;
        }
        "done"
      })
      .unwrap();

    assert_eq!(coroutine.await.unwrap(), "done");
  }

  #[crate::internal_test]
  async fn finished_frames_leave_the_arena(scheduler: Scheduler) {
    let coroutine = scheduler.spawn(async { 1 }).unwrap();
    assert_eq!(coroutine.detach().await.unwrap(), 1);

    // Removal follows right after the body publishes its value.
    while scheduler.live_frames() > 0 {
      yield_now().await;
    }
  }
}
