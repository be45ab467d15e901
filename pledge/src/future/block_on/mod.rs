mod waker;
use waker::park_waker;

use std::{
  future::Future,
  task::{Context, Poll},
};

/// Runs `fut` to completion on the calling thread, parking it while the future is
/// pending.
pub fn block_on<Fut>(fut: Fut) -> Fut::Output
where
  Fut: Future,
{
  let (parker, unparker) = parking::pair();
  let waker = park_waker(unparker);
  let mut context = Context::from_waker(&waker);
  let mut pinned = std::pin::pin!(fut);

  loop {
    match pinned.as_mut().poll(&mut context) {
      Poll::Ready(value) => return value,
      Poll::Pending => parker.park(),
    };
  }
}
