use std::{
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
  thread,
  time::Duration,
};

use pledge::{
  yield_now, ContinuationPolicy, Error, FrameState, Promise, Scheduler,
};

struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
  fn drop(&mut self) {
    self.0.fetch_add(1, Ordering::SeqCst);
  }
}

fn wait_for_state<T: Send + 'static>(coroutine: &pledge::Async<T>, state: FrameState) {
  while coroutine.state() != state {
    thread::sleep(Duration::from_millis(1));
  }
}

fn resume_from_other_threads(scheduler: Scheduler, iterations: usize) {
  let completed = Arc::new(AtomicUsize::new(0));
  let mut promises = Vec::with_capacity(iterations);
  let mut coroutines = Vec::with_capacity(iterations);

  for index in 0..iterations {
    let (promise, future) = Promise::pair();
    let completed = completed.clone();

    let coroutine = scheduler
      .spawn(async move {
        let value: usize = future.await.unwrap();
        completed.fetch_add(1, Ordering::SeqCst);
        value * 2
      })
      .unwrap();

    promises.push((index, promise));
    coroutines.push((index, coroutine));
  }

  let chunk = iterations.div_ceil(4);
  let producers: Vec<_> = (0..4)
    .map(|_| promises.drain(..chunk.min(promises.len())).collect::<Vec<_>>())
    .map(|batch| {
      thread::spawn(move || {
        for (index, mut promise) in batch {
          promise.set_value(index).unwrap();
        }
      })
    })
    .collect();

  for (index, coroutine) in coroutines {
    assert_eq!(coroutine.get().unwrap(), index * 2);
  }
  for producer in producers {
    producer.join().unwrap();
  }

  assert_eq!(completed.load(Ordering::SeqCst), iterations);
  scheduler.shutdown(true).unwrap();
  assert_eq!(scheduler.live_frames(), 0);
}

#[test]
fn ten_thousand_coroutines_resume_exactly_once() {
  resume_from_other_threads(Scheduler::new(4).unwrap(), 10_000);
}

#[test]
fn inline_policy_resumes_on_the_publisher() {
  let scheduler = Scheduler::builder()
    .threads(2)
    .policy(ContinuationPolicy::Inline)
    .build()
    .unwrap();

  resume_from_other_threads(scheduler, 2_000);
}

#[test]
fn inline_resumes_of_chained_coroutines_stay_flat() {
  const LINKS: usize = 10_000;

  let scheduler = Scheduler::builder()
    .threads(1)
    .policy(ContinuationPolicy::Inline)
    .build()
    .unwrap();
  let (mut promise, future) = Promise::pair();

  let mut last = scheduler.spawn(async move { future.await.unwrap() }).unwrap();
  for _ in 0..LINKS {
    let previous = last;
    last = scheduler
      .spawn(async move { previous.await.unwrap() + 1 })
      .unwrap();
  }
  // One worker polls frames in spawn order, so every link is suspended by now.
  wait_for_state(&last, FrameState::Suspended);

  let publisher = thread::spawn(move || promise.set_value(0usize).unwrap());
  publisher.join().unwrap();

  assert_eq!(last.get().unwrap(), LINKS);
  scheduler.shutdown(true).unwrap();
}

#[test]
fn dropping_a_suspended_coroutine_destroys_it() {
  let scheduler = Scheduler::new(2).unwrap();
  let dropped = Arc::new(AtomicUsize::new(0));
  let resumed = Arc::new(AtomicBool::new(false));
  let (mut promise, future) = Promise::<u8>::pair();

  let coroutine = {
    let guard = DropCounter(dropped.clone());
    let resumed = resumed.clone();
    scheduler
      .spawn(async move {
        let _guard = guard;
        let _ = future.await;
        resumed.store(true, Ordering::SeqCst);
      })
      .unwrap()
  };

  wait_for_state(&coroutine, FrameState::Suspended);
  assert_eq!(scheduler.live_frames(), 1);

  drop(coroutine);
  assert_eq!(dropped.load(Ordering::SeqCst), 1);
  assert_eq!(scheduler.live_frames(), 0);

  promise.set_value(1).unwrap();
  scheduler.shutdown(true).unwrap();

  assert!(!resumed.load(Ordering::SeqCst));
  assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[test]
fn detached_coroutine_keeps_running() {
  let scheduler = Scheduler::new(2).unwrap();
  let (mut promise, future) = Promise::pair();

  let output = scheduler
    .spawn(async move { future.await.map(|word: &str| word.len()) })
    .unwrap()
    .detach();

  promise.set_value("detached").unwrap();

  assert_eq!(output.get().unwrap().unwrap(), 8);
  scheduler.shutdown(true).unwrap();
}

#[test]
fn panic_in_a_coroutine_fails_its_output() {
  let scheduler = Scheduler::new(1).unwrap();

  let coroutine = scheduler
    .spawn(async {
      yield_now().await;
      panic!("coroutine exploded");
    })
    .unwrap();

  match coroutine.get() {
    Err(Error::Panicked(message)) => assert_eq!(message, "coroutine exploded"),
    other => panic!("unexpected {other:?}"),
  }
  scheduler.shutdown(true).unwrap();
}

#[test]
fn shutdown_breaks_suspended_coroutines() {
  let scheduler = Scheduler::new(1).unwrap();
  let (_promise, future) = Promise::<u8>::pair();

  let coroutine = scheduler.spawn(async move { future.await }).unwrap();
  wait_for_state(&coroutine, FrameState::Suspended);
  let output = coroutine.detach();

  scheduler.shutdown(true).unwrap();

  assert!(matches!(output.get(), Err(Error::BrokenPromise)));
  assert_eq!(scheduler.live_frames(), 0);
}

#[pledge::test(threads = 2)]
async fn coroutines_await_each_other(scheduler: Scheduler) {
  let (mut promise, future) = Promise::pair();

  let inner = scheduler.spawn(async move { future.await.unwrap() + 1 }).unwrap();
  let outer = scheduler
    .spawn(async move { inner.await.unwrap() * 2 })
    .unwrap();

  promise.set_value(20).unwrap();
  assert_eq!(outer.await.unwrap(), 42);
}

#[pledge::test(threads = 1, policy = "inline")]
async fn current_scheduler_inside_a_coroutine(scheduler: Scheduler) {
  assert_eq!(scheduler.policy(), ContinuationPolicy::Inline);

  let seen = scheduler
    .spawn(async { Scheduler::current().map(|current| current.threads()) })
    .unwrap();

  assert_eq!(seen.await.unwrap(), Some(1));
}

#[pledge::test]
async fn ready_future_needs_no_worker() {
  let value = pledge::Future::ready(9u8).await.unwrap();
  assert_eq!(value, 9);
}
