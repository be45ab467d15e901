use std::{
  future::Future,
  pin::Pin,
  task::{Context, Poll},
};

/// Suspends the current coroutine once, letting other queued work run before it
/// continues.
pub fn yield_now() -> YieldNow {
  YieldNow::default()
}

#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
  yielded: bool,
}

impl Future for YieldNow {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    if self.yielded {
      return Poll::Ready(());
    }

    self.yielded = true;
    cx.waker().wake_by_ref();

    Poll::Pending
  }
}
