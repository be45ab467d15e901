use std::{
  sync::Arc,
  task::{Wake, Waker},
};

use parking::Unparker;

struct ParkWaker(Unparker);

impl Wake for ParkWaker {
  fn wake(self: Arc<Self>) {
    self.0.unpark();
  }

  fn wake_by_ref(self: &Arc<Self>) {
    self.0.unpark();
  }
}

pub(crate) fn park_waker(unparker: Unparker) -> Waker {
  Waker::from(Arc::new(ParkWaker(unparker)))
}
