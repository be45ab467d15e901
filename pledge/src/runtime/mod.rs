//! The worker pool that runs posted tasks, chained continuations and coroutine frames.
//!
//! A [`Scheduler`] owns a fixed set of OS threads pulling from one FIFO queue. It is an
//! ordinary value: build one with [`Scheduler::builder`], clone the handle wherever work
//! must be posted, and stop it with [`Scheduler::shutdown`].

mod context;
pub(crate) mod task;
mod worker;

use std::{
  fmt,
  future::Future as StdFuture,
  mem,
  num::NonZeroUsize,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Condvar, Mutex, PoisonError, RwLock, Weak,
  },
  thread::{self, JoinHandle},
};

use crossbeam_channel::{SendError, Sender};
use tracing::{debug, error, trace};

use crate::{
  coroutine::{self, Async, FrameId, Frames},
  error::Error,
  future,
};
use task::Task;
use worker::{Shared, Workers};

pub(crate) use context::is_worker_thread;

/// Decides where a continuation runs once the value it waits for is published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContinuationPolicy {
  /// On the thread that published the value, before `set_value` returns.
  Inline,
  /// Posted to the worker pool. Falls back to inline once the scheduler is stopped so a
  /// continuation is never lost.
  #[default]
  Deferred,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum WorkerThreads {
  /// One worker per available CPU.
  #[default]
  Cpus,
  Number(NonZeroUsize),
}

impl WorkerThreads {
  pub(crate) fn get_threads(&self) -> NonZeroUsize {
    match self {
      WorkerThreads::Number(num) => *num,
      WorkerThreads::Cpus => {
        thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
  threads: WorkerThreads,
  policy: ContinuationPolicy,
  thread_name: String,
  drain_on_drop: bool,
}

impl Default for SchedulerBuilder {
  fn default() -> Self {
    SchedulerBuilder {
      threads: WorkerThreads::default(),
      policy: ContinuationPolicy::default(),
      thread_name: "pledge-worker".to_owned(),
      drain_on_drop: true,
    }
  }
}

impl SchedulerBuilder {
  /// Number of worker threads. Zero is treated as one.
  pub fn threads(mut self, num: usize) -> Self {
    let num = NonZeroUsize::new(num).unwrap_or(NonZeroUsize::MIN);
    self.threads = WorkerThreads::Number(num);
    self
  }

  pub fn worker_threads(mut self, threads: WorkerThreads) -> Self {
    self.threads = threads;
    self
  }

  pub fn policy(mut self, policy: ContinuationPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// Prefix for worker thread names; workers are called `<prefix>-<index>`.
  pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
    self.thread_name = prefix.into();
    self
  }

  /// Whether dropping the last handle without calling [`Scheduler::shutdown`] runs the
  /// queued tasks (`true`) or discards them.
  pub fn drain_on_drop(mut self, drain: bool) -> Self {
    self.drain_on_drop = drain;
    self
  }

  pub fn build(self) -> Result<Scheduler, Error> {
    static NEXT_ID: AtomicU64 = AtomicU64::new(0);

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let threads = self.threads.get_threads().get();
    let (sender, receiver) = crossbeam_channel::unbounded();
    let queue = Arc::new(Shared::new(id, receiver));

    let inner = Arc::new(SchedulerInner {
      id,
      policy: self.policy,
      threads,
      drain_on_drop: self.drain_on_drop,
      queue: queue.clone(),
      sender: RwLock::new(Some(sender)),
      handles: Mutex::new(Vec::new()),
      joined: Mutex::new(false),
      joined_signal: Condvar::new(),
      frames: Frames::default(),
    });

    let workers = Workers::new(threads, &queue, &Arc::downgrade(&inner));
    match workers.launch(&self.thread_name) {
      Ok(handles) => {
        *inner.handles.lock().unwrap_or_else(PoisonError::into_inner) = handles;
      }
      Err((error, started)) => {
        *inner.handles.lock().unwrap_or_else(PoisonError::into_inner) = started;
        inner.stop(false);
        return Err(error);
      }
    }

    debug!(
      scheduler = id,
      threads,
      policy = ?self.policy,
      "scheduler started"
    );
    Ok(Scheduler { inner })
  }
}

/// Handle to a worker pool. Cloning is cheap; all clones drive the same pool.
#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<SchedulerInner>,
}

impl Scheduler {
  /// A scheduler with `threads` workers and the default [`ContinuationPolicy`].
  pub fn new(threads: usize) -> Result<Self, Error> {
    Scheduler::builder().threads(threads).build()
  }

  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::default()
  }

  /// The scheduler whose worker (or [`Scheduler::block_on`]) is running on this thread.
  pub fn current() -> Option<Scheduler> {
    context::current().map(|inner| Scheduler { inner })
  }

  /// Appends `task` to the queue and wakes a worker.
  ///
  /// Tasks posted from one thread start in posting order. A task that panics is logged
  /// and the worker keeps going.
  pub fn post<F>(&self, task: F) -> Result<(), Error>
  where
    F: FnOnce() + Send + 'static,
  {
    self.inner.try_post(Task::new(task)).map_err(|_| Error::SchedulerStopped)
  }

  /// Starts `future` as a coroutine frame on the pool.
  ///
  /// The returned [`Async`] completes with the future's output, or with
  /// [`Error::Panicked`] if it panics. Dropping the handle cancels the frame.
  pub fn spawn<F>(&self, future: F) -> Result<Async<F::Output>, Error>
  where
    F: StdFuture + Send + 'static,
    F::Output: Send + 'static,
  {
    coroutine::spawn(&self.inner, future)
  }

  /// Runs `future` to completion on the calling thread with this scheduler entered, so
  /// [`Scheduler::current`] resolves to it.
  ///
  /// # Panics
  ///
  /// Panics when called from a worker thread, which would stall the pool.
  pub fn block_on<F>(&self, future: F) -> F::Output
  where
    F: StdFuture,
  {
    assert!(
      !is_worker_thread(),
      "Scheduler::block_on called from a scheduler worker thread"
    );

    let _context =
      context::enter_caller(self.inner.id, Arc::downgrade(&self.inner));
    future::block_on(future)
  }

  /// Stops accepting work and joins every worker.
  ///
  /// With `drain` the workers run the queue empty first; otherwise tasks that have not
  /// started are dropped. Coroutine frames still suspended afterwards are released, so
  /// whoever awaits them sees [`Error::BrokenPromise`].
  ///
  /// Only the first call decides `drain`. A later or concurrent call returns once the
  /// first one has joined every worker.
  pub fn shutdown(&self, drain: bool) -> Result<(), Error> {
    if context::is_worker_of(self.inner.id) {
      return Err(Error::SelfBlockingWait);
    }

    self.inner.stop(drain);
    Ok(())
  }

  pub fn threads(&self) -> usize {
    self.inner.threads
  }

  pub fn policy(&self) -> ContinuationPolicy {
    self.inner.policy
  }

  /// Tasks waiting in the queue.
  pub fn queued(&self) -> usize {
    self.inner.queue.receiver.len()
  }

  /// Coroutine frames that have not finished.
  pub fn live_frames(&self) -> usize {
    self.inner.frames.len()
  }

  pub fn is_stopped(&self) -> bool {
    self.inner.queue.is_stopped()
  }

  pub(crate) fn downgrade(&self) -> Weak<SchedulerInner> {
    Arc::downgrade(&self.inner)
  }
}

impl fmt::Debug for Scheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("id", &self.inner.id)
      .field("threads", &self.inner.threads)
      .field("policy", &self.inner.policy)
      .field("stopped", &self.is_stopped())
      .finish()
  }
}

pub(crate) struct SchedulerInner {
  id: u64,
  policy: ContinuationPolicy,
  threads: usize,
  drain_on_drop: bool,
  queue: Arc<Shared>,
  sender: RwLock<Option<Sender<Task>>>,
  handles: Mutex<Vec<JoinHandle<()>>>,
  /// Set once the stopping thread has joined the workers and released the frames.
  joined: Mutex<bool>,
  joined_signal: Condvar,
  pub(crate) frames: Frames,
}

impl SchedulerInner {
  pub(crate) fn is_stopped(&self) -> bool {
    self.queue.is_stopped()
  }

  /// Queues `task`, or hands it back if the scheduler no longer accepts work.
  pub(crate) fn try_post(&self, task: Task) -> Result<(), Task> {
    if self.queue.is_stopped() {
      return Err(task);
    }

    let sender = self.sender.read().unwrap_or_else(PoisonError::into_inner);
    match sender.as_ref() {
      Some(sender) => sender.send(task).map_err(|SendError(task)| task),
      None => Err(task),
    }
  }

  /// Runs a ready continuation according to the policy.
  pub(crate) fn dispatch(&self, task: Task) {
    match self.policy {
      ContinuationPolicy::Inline => task.run_inline(),
      ContinuationPolicy::Deferred => {
        if let Err(task) = self.try_post(task) {
          trace!(scheduler = self.id, "scheduler stopped, running continuation inline");
          task.run_inline();
        }
      }
    }
  }

  /// Called by a frame's waker: hands the frame back to a thread chosen by the policy.
  pub(crate) fn schedule_resume(self: &Arc<Self>, id: FrameId) {
    let Some(frame) = self.frames.get(id) else {
      trace!(%id, "wake for a released frame ignored");
      return;
    };
    frame.mark_resumed();

    let task = coroutine::resume_task(Arc::downgrade(self), id);
    match self.policy {
      ContinuationPolicy::Inline => task.run_inline(),
      ContinuationPolicy::Deferred => {
        if let Err(task) = self.try_post(task) {
          task.run_inline();
        }
      }
    }
  }

  /// Only the first caller joins the workers and releases the frames; later and
  /// concurrent callers wait until it is done.
  fn stop(&self, drain: bool) {
    if !self.queue.request_stop(drain) {
      self.wait_joined();
      return;
    }
    debug!(scheduler = self.id, drain, "scheduler shutting down");

    drop(self.sender.write().unwrap_or_else(PoisonError::into_inner).take());

    let handles = mem::take(
      &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
    );
    let current = thread::current().id();
    for handle in handles {
      // The last handle may be released by a task on one of our own workers; that
      // thread exits by itself once the queue closes.
      if handle.thread().id() == current {
        continue;
      }
      if handle.join().is_err() {
        error!(scheduler = self.id, "worker thread panicked");
      }
    }

    self.frames.clear();

    *self.joined.lock().unwrap_or_else(PoisonError::into_inner) = true;
    self.joined_signal.notify_all();
  }

  fn wait_joined(&self) {
    let joined = self.joined.lock().unwrap_or_else(PoisonError::into_inner);
    let _joined = self
      .joined_signal
      .wait_while(joined, |joined| !*joined)
      .unwrap_or_else(PoisonError::into_inner);
  }
}

impl Drop for SchedulerInner {
  fn drop(&mut self) {
    if !self.queue.is_stopped() {
      self.stop(self.drain_on_drop);
    }
  }
}

#[cfg(test)]
static_assertions::assert_impl_all!(Scheduler: Send, Sync, Clone);

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{atomic::AtomicUsize, mpsc};

  #[test]
  fn zero_threads_means_one() {
    let scheduler = Scheduler::new(0).unwrap();
    assert_eq!(scheduler.threads(), 1);
    scheduler.shutdown(true).unwrap();
  }

  #[test]
  fn workers_see_current_scheduler() {
    let scheduler = Scheduler::builder()
      .threads(2)
      .thread_name("ctx-test")
      .build()
      .unwrap();
    let (sender, receiver) = mpsc::channel();

    scheduler
      .post(move || {
        let name = thread::current().name().map(str::to_owned);
        let _ = sender.send((Scheduler::current().is_some(), name));
      })
      .unwrap();

    let (has_current, name) = receiver.recv().unwrap();
    assert!(has_current);
    assert!(name.unwrap().starts_with("ctx-test-"));
    assert!(Scheduler::current().is_none());

    scheduler.shutdown(true).unwrap();
  }

  #[test]
  fn shutdown_from_own_worker_is_refused() {
    let scheduler = Scheduler::new(1).unwrap();
    let (sender, receiver) = mpsc::channel();

    let handle = scheduler.clone();
    scheduler
      .post(move || {
        let _ = sender.send(handle.shutdown(true));
      })
      .unwrap();

    assert!(matches!(receiver.recv().unwrap(), Err(Error::SelfBlockingWait)));
    scheduler.shutdown(true).unwrap();
  }

  #[test]
  fn dropping_last_handle_drains() {
    let ran = Arc::new(AtomicUsize::new(0));
    let scheduler = Scheduler::new(1).unwrap();

    for _ in 0..16 {
      let ran = ran.clone();
      scheduler
        .post(move || {
          ran.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    drop(scheduler);

    assert_eq!(ran.load(Ordering::SeqCst), 16);
  }
}
