use std::{
  env,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  thread,
  time::Instant,
};

use pledge::{future::collect_all, Promise, Scheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PRODUCERS: usize = 4;

#[pledge::main(threads = 4)]
async fn main(scheduler: Scheduler) {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let coroutines: usize = env::args()
    .nth(1)
    .and_then(|arg| arg.parse().ok())
    .unwrap_or(10_000);

  let resumed = Arc::new(AtomicUsize::new(0));
  let started = Instant::now();

  let mut promises = Vec::with_capacity(coroutines);
  let mut outputs = Vec::with_capacity(coroutines);
  for index in 0..coroutines {
    let (promise, future) = Promise::pair();
    let resumed = resumed.clone();

    let output = scheduler
      .spawn(async move {
        let value: usize = future.await?;
        resumed.fetch_add(1, Ordering::Relaxed);
        Ok::<_, pledge::Error>(value + index)
      })
      .expect("scheduler stopped while spawning")
      .detach()
      .then(|result: Result<usize, pledge::Error>| result.unwrap_or(0));

    promises.push((index, promise));
    outputs.push(output);
  }
  info!(coroutines, elapsed = ?started.elapsed(), "coroutines suspended");

  let batch = coroutines.div_ceil(PRODUCERS).max(1);
  let mut promises = promises.into_iter();
  let producers: Vec<_> = (0..PRODUCERS)
    .map(|_| promises.by_ref().take(batch).collect::<Vec<_>>())
    .map(|chunk| {
      thread::spawn(move || {
        for (index, mut promise) in chunk {
          promise.set_value(index).expect("value published twice");
        }
      })
    })
    .collect();

  let results = collect_all(outputs).await.expect("collecting outputs");
  for producer in producers {
    producer.join().expect("producer thread panicked");
  }

  let sum: usize = results.into_iter().filter_map(Result::ok).sum();
  info!(
    resumed = resumed.load(Ordering::Relaxed),
    sum,
    elapsed = ?started.elapsed(),
    "all coroutines finished"
  );
}
