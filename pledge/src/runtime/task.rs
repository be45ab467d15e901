use std::{cell::RefCell, collections::VecDeque};

std::thread_local! {
  /// Inline tasks waiting for the outermost [`Task::run_inline`] on this thread.
  /// `Some` while that call is draining.
  static INLINE: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
}

/// A unit of work for the pool: a type-erased, run-once callable.
pub(crate) struct Task(Box<dyn FnOnce() + Send>);

impl Task {
  pub(crate) fn new<F>(f: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    Task(Box::new(f))
  }

  pub(crate) fn run(self) {
    (self.0)()
  }

  /// Runs the task on this thread without nesting.
  ///
  /// An inline task started from within another one is queued and run by the
  /// outermost call once the current task returns, so a chain of continuations runs
  /// in a loop at constant stack depth. The outermost call returns only when the queue
  /// is empty.
  pub(crate) fn run_inline(self) {
    let outermost = INLINE.with(|inline| {
      let mut inline = inline.borrow_mut();
      match inline.as_mut() {
        Some(queue) => {
          queue.push_back(self);
          None
        }
        None => {
          *inline = Some(VecDeque::new());
          Some(self)
        }
      }
    });
    let Some(task) = outermost else {
      return;
    };

    let _drain = Drain;
    task.run();
    while let Some(task) = next_inline() {
      task.run();
    }
  }
}

fn next_inline() -> Option<Task> {
  INLINE.with(|inline| inline.borrow_mut().as_mut().and_then(VecDeque::pop_front))
}

/// Ends the drain even if a task unwinds. Tasks still queued are dropped outside the
/// borrow; dropping one may publish `BrokenPromise`, which starts a new drain.
struct Drain;

impl Drop for Drain {
  fn drop(&mut self) {
    let leftover = INLINE.with(|inline| inline.borrow_mut().take());
    drop(leftover);
  }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Task: Send);
