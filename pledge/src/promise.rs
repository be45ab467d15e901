use std::fmt;

use crate::{
  error::Error,
  loom::sync::Arc,
  runtime::Scheduler,
  state::{Executor, Shared},
  Future,
};

/// Write handle of a single-assignment cell.
///
/// A promise publishes exactly one result, with [`set_value`](Promise::set_value) or
/// [`set_exception`](Promise::set_exception), and hands out exactly one [`Future`].
/// Dropping it unsatisfied fails the future with [`Error::BrokenPromise`].
///
/// # Example
///
/// ```rust
/// use pledge::Promise;
///
/// let mut promise = Promise::new();
/// let future = promise.get_future().unwrap();
/// let next = future.then(|x: i32| x + 1);
///
/// promise.set_value(41).unwrap();
///
/// assert_eq!(next.get().unwrap(), 42);
/// ```
pub struct Promise<T: Send + 'static> {
  shared: Arc<Shared<T>>,
  future_retrieved: bool,
  satisfied: bool,
}

impl<T: Send + 'static> Promise<T> {
  /// A promise whose continuations run inline on the publishing thread.
  pub fn new() -> Self {
    Promise::with_executor(Executor::Inline)
  }

  /// A promise whose continuations are dispatched through `scheduler`.
  pub fn on(scheduler: &Scheduler) -> Self {
    Promise::with_executor(Executor::Pool(scheduler.downgrade()))
  }

  /// A promise and its future.
  pub fn pair() -> (Promise<T>, Future<T>) {
    Promise::pair_with(Executor::Inline)
  }

  pub(crate) fn with_executor(executor: Executor) -> Self {
    Promise {
      shared: Arc::new(Shared::new(executor)),
      future_retrieved: false,
      satisfied: false,
    }
  }

  pub(crate) fn pair_with(executor: Executor) -> (Promise<T>, Future<T>) {
    let mut promise = Promise::with_executor(executor);
    let future = Future::from_shared(promise.shared.clone());
    promise.future_retrieved = true;

    (promise, future)
  }

  /// Returns the paired future. A second call fails with
  /// [`Error::FutureAlreadyRetrieved`].
  pub fn get_future(&mut self) -> Result<Future<T>, Error> {
    if self.future_retrieved {
      return Err(Error::FutureAlreadyRetrieved);
    }

    self.future_retrieved = true;
    Ok(Future::from_shared(self.shared.clone()))
  }

  /// Publishes `value`. A continuation already waiting runs now, on this thread or on
  /// the scheduler the promise is bound to.
  pub fn set_value(&mut self, value: T) -> Result<(), Error> {
    self.set_result(Ok(value))
  }

  /// Publishes an error instead of a value; it surfaces wherever the chain is observed.
  pub fn set_exception(&mut self, error: impl Into<Error>) -> Result<(), Error> {
    self.set_result(Err(error.into()))
  }

  /// Publishes `result`. A second call fails with [`Error::PromiseAlreadySatisfied`]
  /// and the second result is dropped.
  pub fn set_result(&mut self, result: Result<T, Error>) -> Result<(), Error> {
    if self.satisfied {
      return Err(Error::PromiseAlreadySatisfied);
    }

    self.satisfied = true;
    self.shared.try_publish(result)
  }

  pub fn is_satisfied(&self) -> bool {
    self.satisfied
  }
}

impl<T: Send + 'static> Default for Promise<T> {
  fn default() -> Self {
    Promise::new()
  }
}

impl<T: Send + 'static> Drop for Promise<T> {
  fn drop(&mut self) {
    if !self.satisfied {
      self.satisfied = true;
      let _ = self.shared.try_publish(Err(Error::BrokenPromise));
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Promise")
      .field("shared", &self.shared)
      .field("future_retrieved", &self.future_retrieved)
      .field("satisfied", &self.satisfied)
      .finish()
  }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Promise<u8>: Send, Sync);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn get_future_once() {
    let mut promise = Promise::<u8>::new();

    assert!(promise.get_future().is_ok());
    assert!(matches!(
      promise.get_future(),
      Err(Error::FutureAlreadyRetrieved)
    ));
  }

  #[test]
  fn pair_counts_as_retrieved() {
    let (mut promise, _future) = Promise::<u8>::pair();

    assert!(matches!(
      promise.get_future(),
      Err(Error::FutureAlreadyRetrieved)
    ));
  }

  #[test]
  fn second_value_never_observed() {
    let (mut promise, future) = Promise::pair();

    promise.set_value("first").unwrap();
    assert!(matches!(
      promise.set_value("second"),
      Err(Error::PromiseAlreadySatisfied)
    ));
    assert!(matches!(
      promise.set_exception(crate::Exception::msg("late")),
      Err(Error::PromiseAlreadySatisfied)
    ));

    assert_eq!(future.get().unwrap(), "first");
  }

  #[test]
  fn dropped_promise_breaks_future() {
    let (promise, future) = Promise::<u8>::pair();
    drop(promise);

    assert!(matches!(future.get(), Err(Error::BrokenPromise)));
  }
}
