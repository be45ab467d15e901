use std::{
  cell::RefCell,
  sync::{Arc, Weak},
};

use super::SchedulerInner;

std::thread_local! {
  static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

#[derive(Clone)]
struct Context {
  scheduler_id: u64,
  handle: Weak<SchedulerInner>,
  worker: bool,
}

/// Restores the previously entered context when dropped.
pub(crate) struct ContextGuard {
  previous: Option<Context>,
}

impl Drop for ContextGuard {
  fn drop(&mut self) {
    let previous = self.previous.take();
    CONTEXT.with(|ctx| *ctx.borrow_mut() = previous);
  }
}

fn enter(context: Context) -> ContextGuard {
  let previous = CONTEXT.with(|ctx| ctx.borrow_mut().replace(context));
  ContextGuard { previous }
}

/// Marks the current thread as a worker of the scheduler `scheduler_id`.
pub(crate) fn enter_worker(
  scheduler_id: u64,
  handle: Weak<SchedulerInner>,
) -> ContextGuard {
  enter(Context { scheduler_id, handle, worker: true })
}

/// Makes `handle` the current scheduler of a non-worker thread, for `block_on`.
pub(crate) fn enter_caller(
  scheduler_id: u64,
  handle: Weak<SchedulerInner>,
) -> ContextGuard {
  enter(Context { scheduler_id, handle, worker: false })
}

pub(crate) fn current() -> Option<Arc<SchedulerInner>> {
  CONTEXT.with(|ctx| ctx.borrow().as_ref().and_then(|ctx| ctx.handle.upgrade()))
}

/// True on any scheduler's worker thread.
pub(crate) fn is_worker_thread() -> bool {
  CONTEXT.with(|ctx| ctx.borrow().as_ref().is_some_and(|ctx| ctx.worker))
}

pub(crate) fn is_worker_of(scheduler_id: u64) -> bool {
  CONTEXT.with(|ctx| {
    ctx
      .borrow()
      .as_ref()
      .is_some_and(|ctx| ctx.worker && ctx.scheduler_id == scheduler_id)
  })
}
