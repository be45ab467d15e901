use std::{
  panic::{self, AssertUnwindSafe},
  sync::{Arc, Weak},
};

use tracing::{debug, error, trace_span};

use super::shared::Shared;
use crate::{
  error::panic_message,
  runtime::{context, SchedulerInner},
};

// Local worker.
pub(crate) struct Worker {
  index: usize,
  shared: Arc<Shared>,
  handle: Weak<SchedulerInner>,
}

impl Worker {
  pub(crate) fn new(
    index: usize,
    shared: Arc<Shared>,
    handle: Weak<SchedulerInner>,
  ) -> Self {
    Worker { index, shared, handle }
  }

  pub(crate) fn launch(self) {
    let span = trace_span!(
      "worker",
      scheduler = self.shared.scheduler_id,
      worker = self.index
    );
    let _span = span.enter();
    let _context = context::enter_worker(self.shared.scheduler_id, self.handle);

    let mut executed = 0usize;
    let mut discarded = 0usize;

    // Ends once the scheduler dropped its sender and the queue is empty.
    for task in self.shared.receiver.iter() {
      if self.shared.discards() {
        discarded += 1;
        drop(task);
        continue;
      }

      executed += 1;
      if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run()))
      {
        error!(panic = %panic_message(payload.as_ref()), "task panicked");
      }
    }

    debug!(executed, discarded, "worker exiting");
  }
}
