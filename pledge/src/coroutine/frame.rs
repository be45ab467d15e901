use std::{
  fmt,
  future::Future as StdFuture,
  panic::{self, AssertUnwindSafe},
  pin::Pin,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, Weak,
  },
  task::{Context, Poll},
};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::waker::frame_waker;
use crate::{error::Error, runtime::SchedulerInner, Promise};

/// Stable handle of a coroutine frame within its scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u64);

impl fmt::Display for FrameId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "frame-{}", self.0)
  }
}

/// Lifecycle of a coroutine frame.
///
/// `Created → Running → (Suspended → Resumed → Running)* → Completed | Failed`, with
/// `Cancelled` reachable from every non-final state when the handle is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
  Created,
  Running,
  Suspended,
  /// Woken and waiting for a thread to run it.
  Resumed,
  Completed,
  Failed,
  Cancelled,
}

impl FrameState {
  pub fn is_final(self) -> bool {
    matches!(
      self,
      FrameState::Completed | FrameState::Failed | FrameState::Cancelled
    )
  }
}

/// A type-erased coroutine body.
pub(crate) trait Coroutine: Send {
  fn resume(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()>;

  /// Completes the body's promise with `error` after a panic escaped `resume`.
  fn fail(self: Pin<&mut Self>, error: Error);
}

pin_project_lite::pin_project! {
  pub(crate) struct Body<F>
  where
    F: StdFuture,
    F::Output: Send,
    F::Output: 'static,
  {
    #[pin]
    future: F,
    promise: Promise<F::Output>,
  }
}

impl<F> Body<F>
where
  F: StdFuture,
  F::Output: Send + 'static,
{
  pub(crate) fn new(future: F, promise: Promise<F::Output>) -> Self {
    Body { future, promise }
  }
}

impl<F> Coroutine for Body<F>
where
  F: StdFuture + Send,
  F::Output: Send + 'static,
{
  fn resume(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let this = self.project();

    match this.future.poll(cx) {
      Poll::Pending => Poll::Pending,
      Poll::Ready(value) => {
        // Nobody awaiting the output is fine.
        let _ = this.promise.set_value(value);
        Poll::Ready(())
      }
    }
  }

  fn fail(self: Pin<&mut Self>, error: Error) {
    let _ = self.project().promise.set_exception(error);
  }
}

type BoxedBody = Pin<Box<dyn Coroutine>>;

pub(crate) struct Frame {
  id: FrameId,
  inner: Mutex<FrameInner>,
}

struct FrameInner {
  state: FrameState,
  /// `None` while a thread is polling the body, or once the frame finished.
  body: Option<BoxedBody>,
  /// A wake arrived while the body was being polled.
  notified: bool,
}

impl Frame {
  fn new(id: FrameId, body: BoxedBody) -> Self {
    Frame {
      id,
      inner: Mutex::new(FrameInner {
        state: FrameState::Created,
        body: Some(body),
        notified: false,
      }),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, FrameInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn id(&self) -> FrameId {
    self.id
  }

  pub(crate) fn state(&self) -> FrameState {
    self.lock().state
  }

  pub(crate) fn mark_resumed(&self) {
    let mut inner = self.lock();
    if inner.state == FrameState::Suspended {
      inner.state = FrameState::Resumed;
    }
  }

  /// Takes the body for polling. A frame already being polled only records the wake.
  fn begin(&self) -> Option<BoxedBody> {
    let mut inner = self.lock();

    if inner.state == FrameState::Running {
      inner.notified = true;
      return None;
    }

    let body = inner.body.take()?;
    inner.state = FrameState::Running;
    inner.notified = false;
    Some(body)
  }

  /// Puts a pending body back. Returns it again if a wake raced with the poll.
  fn suspend(&self, body: BoxedBody) -> Option<BoxedBody> {
    let mut inner = self.lock();

    match inner.state {
      FrameState::Cancelled => {
        drop(inner);
        drop(body);
        None
      }
      _ if inner.notified => {
        inner.notified = false;
        inner.state = FrameState::Resumed;
        Some(body)
      }
      _ => {
        inner.state = FrameState::Suspended;
        inner.body = Some(body);
        None
      }
    }
  }

  fn finish(&self, state: FrameState) {
    let mut inner = self.lock();
    if inner.state != FrameState::Cancelled {
      inner.state = state;
    }
  }

  /// Marks the frame cancelled and destroys its body, which drops whatever future the
  /// body was suspended on and with it the registered continuation.
  pub(crate) fn cancel(&self) {
    let mut inner = self.lock();
    if inner.state.is_final() {
      return;
    }
    inner.state = FrameState::Cancelled;
    let body = inner.body.take();
    drop(inner);

    if body.is_some() {
      debug!(id = %self.id, "suspended coroutine cancelled");
    }
    drop(body);
  }
}

/// Arena of the live frames of one scheduler, keyed by [`FrameId`].
///
/// Wakers hold only the id, so a frame released from the arena can never be resumed.
#[derive(Default)]
pub(crate) struct Frames {
  next: AtomicU64,
  frames: DashMap<FrameId, Arc<Frame>>,
}

impl Frames {
  pub(crate) fn insert(&self, body: BoxedBody) -> Arc<Frame> {
    let id = FrameId(self.next.fetch_add(1, Ordering::Relaxed));
    let frame = Arc::new(Frame::new(id, body));
    self.frames.insert(id, frame.clone());
    frame
  }

  pub(crate) fn get(&self, id: FrameId) -> Option<Arc<Frame>> {
    // The shard guard is released before the caller touches the frame.
    self.frames.get(&id).map(|entry| entry.value().clone())
  }

  pub(crate) fn remove(&self, id: FrameId) -> Option<Arc<Frame>> {
    self.frames.remove(&id).map(|(_, frame)| frame)
  }

  pub(crate) fn cancel(&self, id: FrameId) {
    if let Some(frame) = self.remove(id) {
      frame.cancel();
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.frames.len()
  }

  pub(crate) fn clear(&self) {
    let ids: Vec<FrameId> = self.frames.iter().map(|entry| *entry.key()).collect();
    if !ids.is_empty() {
      debug!(frames = ids.len(), "releasing unfinished coroutine frames");
    }
    for id in ids {
      self.cancel(id);
    }
  }
}

/// Polls frame `id` until it suspends, finishes or fails.
pub(crate) fn resume(scheduler: &Arc<SchedulerInner>, id: FrameId) {
  let Some(frame) = scheduler.frames.get(id) else {
    trace!(%id, "resume of a released frame ignored");
    return;
  };
  let Some(mut body) = frame.begin() else {
    return;
  };

  let waker = frame_waker(id, Arc::downgrade(scheduler));
  let mut cx = Context::from_waker(&waker);

  loop {
    let polled =
      panic::catch_unwind(AssertUnwindSafe(|| body.as_mut().resume(&mut cx)));

    match polled {
      Ok(Poll::Pending) => match frame.suspend(body) {
        Some(again) => body = again,
        None => return,
      },
      Ok(Poll::Ready(())) => {
        trace!(%id, "coroutine completed");
        frame.finish(FrameState::Completed);
        break;
      }
      Err(payload) => {
        let error = Error::from_panic(payload);
        debug!(%id, %error, "coroutine failed");
        frame.finish(FrameState::Failed);
        body.as_mut().fail(error);
        break;
      }
    }
  }

  scheduler.frames.remove(id);
}

pub(crate) fn resume_task(
  scheduler: Weak<SchedulerInner>,
  id: FrameId,
) -> crate::runtime::task::Task {
  crate::runtime::task::Task::new(move || {
    if let Some(scheduler) = scheduler.upgrade() {
      resume(&scheduler, id);
    }
  })
}
