//! The read side of a promise, and combinators over it.

pub(crate) mod block_on;
mod collect;

pub use block_on::block_on;
pub use collect::{collect_all, CollectAll};

use std::{
  fmt,
  future::Future as StdFuture,
  panic::{self, AssertUnwindSafe},
  pin::Pin,
  task::{Context, Poll},
};

use crate::{
  error::Error,
  loom::sync::Arc,
  runtime::{is_worker_thread, Scheduler},
  state::{Callback, Shared},
  Promise,
};

/// Read handle of a single-assignment cell.
///
/// A `Future` is consumed exactly once: by [`get`](Future::get), by a chaining stage
/// such as [`then`](Future::then), or by `.await`. It is move-only, so a second
/// consumer cannot exist.
///
/// Errors short-circuit a chain: a value stage (`then`, `and_then`) is skipped when its
/// input is an error, and the error travels on until a [`recover`](Future::recover) or
/// [`then_try`](Future::then_try) stage, or the final `get`/`.await`, observes it.
///
/// Dropping a future that still waits deregisters its continuation. An error that was
/// published but never observed is logged.
#[must_use = "futures do nothing unless consumed"]
pub struct Future<T: Send + 'static> {
  shared: Arc<Shared<T>>,
  /// Handed to a continuation; dropping must not abandon the cell.
  consumed: bool,
}

impl<T: Send + 'static> Future<T> {
  pub(crate) fn from_shared(shared: Arc<Shared<T>>) -> Self {
    Future { shared, consumed: false }
  }

  /// An already fulfilled future.
  pub fn ready(value: T) -> Self {
    Future::from_shared(Arc::new(Shared::ready(Ok(value))))
  }

  /// An already failed future.
  pub fn failed(error: impl Into<Error>) -> Self {
    Future::from_shared(Arc::new(Shared::ready(Err(error.into()))))
  }

  /// Dispatches this future's continuation, and those of stages chained onto it,
  /// through `scheduler`.
  pub fn via(self, scheduler: &Scheduler) -> Self {
    self.shared.set_executor(crate::state::Executor::Pool(scheduler.downgrade()));
    self
  }

  pub fn is_ready(&self) -> bool {
    self.shared.is_ready()
  }

  /// Takes the result if it is already here, without blocking.
  pub fn try_get(&mut self) -> Option<Result<T, Error>> {
    self.shared.try_take()
  }

  /// Blocks the calling thread until the result is published.
  ///
  /// On a scheduler worker thread this fails with [`Error::SelfBlockingWait`] instead of
  /// blocking, unless the result is already available.
  pub fn get(mut self) -> Result<T, Error> {
    if let Some(result) = self.try_get() {
      return result;
    }
    if is_worker_thread() {
      return Err(Error::SelfBlockingWait);
    }

    block_on(self)
  }

  /// Chains a stage that sees the full result, error included.
  ///
  /// `f` runs exactly once. A panic inside it becomes [`Error::Panicked`] on the
  /// returned future.
  pub fn then_try<U, F>(self, f: F) -> Future<U>
  where
    U: Send + 'static,
    F: FnOnce(Result<T, Error>) -> Result<U, Error> + Send + 'static,
  {
    let (mut promise, future) = Promise::pair_with(self.shared.executor());

    self.register(Box::new(move |result| {
      let output = panic::catch_unwind(AssertUnwindSafe(|| f(result)))
        .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
      let _ = promise.set_result(output);
    }));

    future
  }

  /// Chains a value stage. Skipped when this future fails; the error is passed on.
  pub fn then<U, F>(self, f: F) -> Future<U>
  where
    U: Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
  {
    self.then_try(move |result| result.map(f))
  }

  /// Chains a stage that itself returns a future and flattens the two.
  pub fn and_then<U, F>(self, f: F) -> Future<U>
  where
    U: Send + 'static,
    F: FnOnce(T) -> Future<U> + Send + 'static,
  {
    let (mut promise, future) = Promise::pair_with(self.shared.executor());

    self.register(Box::new(move |result| {
      let value = match result {
        Ok(value) => value,
        Err(error) => {
          let _ = promise.set_exception(error);
          return;
        }
      };

      match panic::catch_unwind(AssertUnwindSafe(|| f(value))) {
        Ok(inner) => inner.forward(promise),
        Err(payload) => {
          let _ = promise.set_exception(Error::from_panic(payload));
        }
      }
    }));

    future
  }

  /// Chains an error handler: `f` runs only if this future failed and may turn the
  /// error back into a value.
  pub fn recover<F>(self, f: F) -> Future<T>
  where
    F: FnOnce(Error) -> Result<T, Error> + Send + 'static,
  {
    self.then_try(move |result| match result {
      Ok(value) => Ok(value),
      Err(error) => f(error),
    })
  }

  /// Publishes this future's result through `promise` once it arrives.
  pub(crate) fn forward(self, mut promise: Promise<T>) {
    self.register(Box::new(move |result| {
      let _ = promise.set_result(result);
    }));
  }

  pub(crate) fn register(self, callback: Callback<T>) {
    if let Err((error, callback)) = self.into_shared().try_register(callback) {
      callback(Err(error));
    }
  }

  fn into_shared(mut self) -> Arc<Shared<T>> {
    self.consumed = true;
    self.shared.clone()
  }
}

impl<T: Send + 'static> StdFuture for Future<T> {
  type Output = Result<T, Error>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    self.shared.poll_result(cx.waker())
  }
}

impl<T: Send + 'static> Drop for Future<T> {
  fn drop(&mut self) {
    if !self.consumed {
      self.shared.abandon();
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Future<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Future").field(&self.shared).finish()
  }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Future<u8>: Send, Sync, Unpin);
#[cfg(test)]
static_assertions::assert_not_impl_any!(Future<u8>: Clone);

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Exception;

  #[test]
  fn ready_and_failed() {
    assert_eq!(Future::ready(3).get().unwrap(), 3);
    assert!(matches!(
      Future::<u8>::failed(Exception::msg("nope")).get(),
      Err(Error::Propagated(_))
    ));
  }

  #[test]
  fn try_get_takes_once() {
    let (mut promise, mut future) = Promise::pair();
    assert!(future.try_get().is_none());

    promise.set_value(1).unwrap();
    assert!(future.is_ready());
    assert_eq!(future.try_get().unwrap().unwrap(), 1);
    assert!(matches!(future.get(), Err(Error::FutureAlreadyRetrieved)));
  }

  #[test]
  fn handing_off_keeps_the_cell_live() {
    let (mut promise, future) = Promise::pair();
    let shared = future.shared.clone();
    let (sender, receiver) = std::sync::mpsc::channel();

    future.register(Box::new(move |result| sender.send(result.unwrap()).unwrap()));
    assert_eq!(
      format!("{shared:?}"),
      "Shared { state: \"HasContinuation(callback)\" }"
    );

    promise.set_value(3u8).unwrap();
    assert_eq!(receiver.try_recv().unwrap(), 3);
  }

  #[test]
  fn panicking_stage_fails_chain() {
    let chained = Future::ready(1).then(|_| -> u8 { panic!("stage exploded") });

    match chained.get() {
      Err(Error::Panicked(message)) => assert_eq!(message, "stage exploded"),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn and_then_flattens() {
    let (mut inner_promise, inner) = Promise::pair();
    let (mut promise, future) = Promise::pair();

    let flattened = future.and_then(move |x: u32| inner.then(move |y: u32| x + y));

    promise.set_value(40).unwrap();
    assert!(!flattened.is_ready());

    inner_promise.set_value(2).unwrap();
    assert_eq!(flattened.get().unwrap(), 42);
  }

  #[test]
  fn recover_handles_error() {
    let recovered = Future::<u8>::failed(Exception::msg("boom"))
      .then(|_: u8| -> u8 { unreachable!("value stage ran on error") })
      .recover(|error| {
        assert_eq!(error.to_string(), "boom");
        Ok(7)
      });

    assert_eq!(recovered.get().unwrap(), 7);
  }
}
