use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::Receiver;

use crate::runtime::task::Task;

const RUNNING: u8 = 0;
/// Shutdown requested; queued tasks still run.
const DRAINING: u8 = 1;
/// Shutdown requested; queued tasks are dropped unstarted.
const DISCARDING: u8 = 2;

/// State every worker of one scheduler reads.
pub(crate) struct Shared {
  pub(crate) scheduler_id: u64,
  pub(crate) receiver: Receiver<Task>,
  mode: AtomicU8,
}

impl Shared {
  pub(crate) fn new(scheduler_id: u64, receiver: Receiver<Task>) -> Self {
    Shared { scheduler_id, receiver, mode: AtomicU8::new(RUNNING) }
  }

  pub(crate) fn is_stopped(&self) -> bool {
    self.mode.load(Ordering::Acquire) != RUNNING
  }

  pub(crate) fn discards(&self) -> bool {
    self.mode.load(Ordering::Acquire) == DISCARDING
  }

  /// Returns false if shutdown had already been requested.
  pub(crate) fn request_stop(&self, drain: bool) -> bool {
    let mode = if drain { DRAINING } else { DISCARDING };
    self
      .mode
      .compare_exchange(RUNNING, mode, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stop_is_requested_once() {
    let (_sender, receiver) = crossbeam_channel::unbounded();
    let shared = Shared::new(0, receiver);

    assert!(!shared.is_stopped());
    assert!(shared.request_stop(false));
    assert!(!shared.request_stop(true));
    assert!(shared.is_stopped());
    assert!(shared.discards());
  }
}
