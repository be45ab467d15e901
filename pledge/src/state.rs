//! The single-assignment cell shared by a [`Promise`](crate::Promise) and its
//! [`Future`](crate::Future).
//!
//! One mutex covers every transition. The decision "store the result" versus "hand the
//! result to the waiting continuation" is taken under that lock, and the continuation is
//! moved out and invoked only after the lock is released.

use std::{
  fmt,
  mem,
  sync::Weak,
  task::{Poll, Waker},
};

use tracing::{debug, trace, warn};

use crate::{
  error::Error,
  loom::sync::{lock, Mutex},
  runtime::{task::Task, SchedulerInner},
};

pub(crate) type Callback<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

pub(crate) enum Continuation<T> {
  /// Runs once with the published result. `then` stages and chained promises use this.
  Callback(Callback<T>),
  /// Wakes a suspended coroutine frame or a thread parked in `get`; the result stays in
  /// the slot until the woken side takes it.
  Resume(Waker),
}

pub(crate) enum Slot<T> {
  Empty,
  Waiting(Continuation<T>),
  Ready(Result<T, Error>),
  /// The consumer took the result.
  Consumed,
  /// The consumer was dropped without taking a result.
  Abandoned,
}

impl<T> Slot<T> {
  fn name(&self) -> &'static str {
    match self {
      Slot::Empty => "Empty",
      Slot::Waiting(Continuation::Callback(_)) => "HasContinuation(callback)",
      Slot::Waiting(Continuation::Resume(_)) => "HasContinuation(resume)",
      Slot::Ready(Ok(_)) => "HasValue",
      Slot::Ready(Err(_)) => "HasError",
      Slot::Consumed => "Done",
      Slot::Abandoned => "Abandoned",
    }
  }
}

/// Where callbacks registered on a cell run once the cell is fulfilled.
#[derive(Clone, Default)]
pub(crate) enum Executor {
  /// On whichever thread completes the handoff.
  #[default]
  Inline,
  /// Through a scheduler, which applies its [`ContinuationPolicy`](crate::ContinuationPolicy).
  Pool(Weak<SchedulerInner>),
}

impl Executor {
  pub(crate) fn execute(&self, task: Task) {
    match self {
      Executor::Inline => task.run_inline(),
      Executor::Pool(scheduler) => match scheduler.upgrade() {
        Some(scheduler) => scheduler.dispatch(task),
        None => {
          trace!("scheduler released, running continuation inline");
          task.run_inline()
        }
      },
    }
  }
}

struct Cell<T> {
  slot: Slot<T>,
  executor: Executor,
}

pub(crate) struct Shared<T: Send + 'static> {
  cell: Mutex<Cell<T>>,
}

impl<T: Send + 'static> Shared<T> {
  pub(crate) fn new(executor: Executor) -> Self {
    Shared { cell: Mutex::new(Cell { slot: Slot::Empty, executor }) }
  }

  pub(crate) fn ready(result: Result<T, Error>) -> Self {
    Shared {
      cell: Mutex::new(Cell {
        slot: Slot::Ready(result),
        executor: Executor::Inline,
      }),
    }
  }

  pub(crate) fn executor(&self) -> Executor {
    lock(&self.cell).executor.clone()
  }

  pub(crate) fn set_executor(&self, executor: Executor) {
    lock(&self.cell).executor = executor;
  }

  pub(crate) fn is_ready(&self) -> bool {
    matches!(lock(&self.cell).slot, Slot::Ready(_))
  }

  /// Producer side. Stores `result`, or hands it to the registered continuation.
  pub(crate) fn try_publish(&self, result: Result<T, Error>) -> Result<(), Error> {
    let mut cell = lock(&self.cell);

    match mem::replace(&mut cell.slot, Slot::Consumed) {
      Slot::Empty => {
        trace!("result published before any continuation");
        cell.slot = Slot::Ready(result);
        Ok(())
      }
      Slot::Waiting(Continuation::Resume(waker)) => {
        cell.slot = Slot::Ready(result);
        drop(cell);

        trace!("result published, waking consumer");
        waker.wake();
        Ok(())
      }
      Slot::Waiting(Continuation::Callback(callback)) => {
        let executor = cell.executor.clone();
        drop(cell);

        trace!("result published, dispatching continuation");
        executor.execute(Task::new(move || callback(result)));
        Ok(())
      }
      Slot::Abandoned => {
        cell.slot = Slot::Abandoned;
        drop(cell);

        report_unobserved(result);
        Ok(())
      }
      slot @ (Slot::Ready(_) | Slot::Consumed) => {
        cell.slot = slot;
        Err(Error::PromiseAlreadySatisfied)
      }
    }
  }

  /// Consumer side. Installs `callback`, or runs it right away if the result is already
  /// here. On failure the callback is handed back untouched.
  pub(crate) fn try_register(
    &self,
    callback: Callback<T>,
  ) -> Result<(), (Error, Callback<T>)> {
    let mut cell = lock(&self.cell);

    match mem::replace(&mut cell.slot, Slot::Consumed) {
      // A previous poll left its waker behind; the future has since been moved into
      // a `then` stage, so the waker is stale.
      Slot::Empty | Slot::Waiting(Continuation::Resume(_)) => {
        cell.slot = Slot::Waiting(Continuation::Callback(callback));
        Ok(())
      }
      Slot::Ready(result) => {
        let executor = cell.executor.clone();
        drop(cell);

        executor.execute(Task::new(move || callback(result)));
        Ok(())
      }
      slot @ (Slot::Waiting(Continuation::Callback(_))
      | Slot::Consumed
      | Slot::Abandoned) => {
        cell.slot = slot;
        Err((Error::FutureAlreadyRetrieved, callback))
      }
    }
  }

  /// Awaiting side. Takes the result, or parks `waker` as the continuation.
  pub(crate) fn poll_result(&self, waker: &Waker) -> Poll<Result<T, Error>> {
    let mut cell = lock(&self.cell);

    match mem::replace(&mut cell.slot, Slot::Consumed) {
      Slot::Ready(result) => Poll::Ready(result),
      Slot::Empty => {
        cell.slot = Slot::Waiting(Continuation::Resume(waker.clone()));
        Poll::Pending
      }
      Slot::Waiting(Continuation::Resume(previous)) => {
        let waker = if previous.will_wake(waker) {
          previous
        } else {
          waker.clone()
        };
        cell.slot = Slot::Waiting(Continuation::Resume(waker));
        Poll::Pending
      }
      slot @ (Slot::Waiting(Continuation::Callback(_)) | Slot::Abandoned) => {
        cell.slot = slot;
        Poll::Ready(Err(Error::FutureAlreadyRetrieved))
      }
      Slot::Consumed => Poll::Ready(Err(Error::FutureAlreadyRetrieved)),
    }
  }

  pub(crate) fn try_take(&self) -> Option<Result<T, Error>> {
    let mut cell = lock(&self.cell);

    match mem::replace(&mut cell.slot, Slot::Consumed) {
      Slot::Ready(result) => Some(result),
      slot => {
        cell.slot = slot;
        None
      }
    }
  }

  /// The consumer went away. Deregisters any parked waker so nothing is woken later.
  pub(crate) fn abandon(&self) {
    let previous = mem::replace(&mut lock(&self.cell).slot, Slot::Abandoned);

    match previous {
      Slot::Ready(result) => report_unobserved(result),
      Slot::Waiting(Continuation::Resume(_)) => {
        trace!("consumer dropped while waiting, continuation deregistered")
      }
      _ => {}
    }
  }
}

impl<T: Send + 'static> Drop for Shared<T> {
  fn drop(&mut self) {
    // Reached with a result only when no future was ever retrieved.
    let slot = mem::replace(&mut lock(&self.cell).slot, Slot::Abandoned);
    if let Slot::Ready(result) = slot {
      report_unobserved(result);
    }
  }
}

impl<T: Send + 'static> fmt::Debug for Shared<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Shared").field("state", &lock(&self.cell).slot.name()).finish()
  }
}

fn report_unobserved<T>(result: Result<T, Error>) {
  match result {
    Ok(_) => {}
    Err(Error::BrokenPromise) => debug!("broken promise was never observed"),
    Err(error) => warn!(%error, "future dropped with an unobserved error"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  fn counting_callback(hits: &Arc<AtomicUsize>) -> Callback<u32> {
    let hits = hits.clone();
    Box::new(move |result| {
      assert_eq!(result.unwrap(), 7);
      hits.fetch_add(1, Ordering::SeqCst);
    })
  }

  #[test]
  fn publish_then_register() {
    let shared = Shared::<u32>::new(Executor::Inline);
    let hits = Arc::new(AtomicUsize::new(0));

    shared.try_publish(Ok(7)).unwrap();
    assert!(shared.is_ready());
    assert!(shared.try_register(counting_callback(&hits)).is_ok());

    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn register_then_publish() {
    let shared = Shared::<u32>::new(Executor::Inline);
    let hits = Arc::new(AtomicUsize::new(0));

    assert!(shared.try_register(counting_callback(&hits)).is_ok());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    shared.try_publish(Ok(7)).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn second_publish_is_rejected() {
    let shared = Shared::<u32>::new(Executor::Inline);

    shared.try_publish(Ok(1)).unwrap();
    assert!(matches!(
      shared.try_publish(Ok(2)),
      Err(Error::PromiseAlreadySatisfied)
    ));
    assert_eq!(shared.try_take().unwrap().unwrap(), 1);
  }

  #[test]
  fn second_callback_is_handed_back() {
    let shared = Shared::<u32>::new(Executor::Inline);
    let hits = Arc::new(AtomicUsize::new(0));

    assert!(shared.try_register(counting_callback(&hits)).is_ok());
    let Err((error, _callback)) =
      shared.try_register(counting_callback(&hits))
    else {
      panic!("second registration accepted");
    };
    assert!(matches!(error, Error::FutureAlreadyRetrieved));
  }

  #[test]
  fn abandoned_cell_accepts_publish() {
    let shared = Shared::<u32>::new(Executor::Inline);
    shared.abandon();

    assert!(shared.try_publish(Ok(3)).is_ok());
    assert_eq!(format!("{shared:?}"), "Shared { state: \"Abandoned\" }");
  }
}
