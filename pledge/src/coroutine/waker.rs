use std::{
  sync::{Arc, Weak},
  task::{Wake, Waker},
};

use super::FrameId;
use crate::runtime::SchedulerInner;

/// Resume handle of a suspended frame. Holds the frame's id and a weak scheduler
/// reference, so an outstanding waker keeps neither alive.
struct FrameWaker {
  id: FrameId,
  scheduler: Weak<SchedulerInner>,
}

impl Wake for FrameWaker {
  fn wake(self: Arc<Self>) {
    self.wake_by_ref();
  }

  fn wake_by_ref(self: &Arc<Self>) {
    if let Some(scheduler) = self.scheduler.upgrade() {
      scheduler.schedule_resume(self.id);
    }
  }
}

pub(crate) fn frame_waker(id: FrameId, scheduler: Weak<SchedulerInner>) -> Waker {
  Waker::from(Arc::new(FrameWaker { id, scheduler }))
}
