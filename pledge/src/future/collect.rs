use crate::{
  error::Error,
  loom::sync::{
    atomic::{AtomicUsize, Ordering},
    lock, Arc, Mutex,
  },
  Future, Promise,
};

/// Output of [`collect_all`]: every input's result, in input order.
pub type CollectAll<T> = Future<Vec<Result<T, Error>>>;

struct Gather<T: Send + 'static> {
  results: Mutex<Vec<Option<Result<T, Error>>>>,
  remaining: AtomicUsize,
  promise: Mutex<Option<Promise<Vec<Result<T, Error>>>>>,
}

impl<T: Send + 'static> Gather<T> {
  fn store(&self, index: usize, result: Result<T, Error>) {
    lock(&self.results)[index] = Some(result);

    if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
      return;
    }

    let results = std::mem::take(&mut *lock(&self.results))
      .into_iter()
      .map(|result| result.unwrap_or(Err(Error::BrokenPromise)))
      .collect();
    // Taken out first: the guard must be gone before the output's continuation runs.
    let promise = lock(&self.promise).take();
    if let Some(mut promise) = promise {
      let _ = promise.set_value(results);
    }
  }
}

/// Waits for every future in `futures` and yields all their results, failures
/// included, in the order the futures were given.
///
/// ```rust
/// use pledge::{future::collect_all, Future, Promise};
///
/// let (mut promise, pending) = Promise::pair();
/// let all = collect_all(vec![Future::ready(1), pending]);
///
/// promise.set_value(2).unwrap();
/// let values: Vec<i32> = all.get().unwrap().into_iter().map(Result::unwrap).collect();
/// assert_eq!(values, [1, 2]);
/// ```
pub fn collect_all<T, I>(futures: I) -> CollectAll<T>
where
  T: Send + 'static,
  I: IntoIterator<Item = Future<T>>,
{
  let futures: Vec<Future<T>> = futures.into_iter().collect();
  if futures.is_empty() {
    return Future::ready(Vec::new());
  }

  let (promise, output) = Promise::pair();
  let gather = Arc::new(Gather {
    results: Mutex::new(futures.iter().map(|_| None).collect()),
    remaining: AtomicUsize::new(futures.len()),
    promise: Mutex::new(Some(promise)),
  });

  for (index, future) in futures.into_iter().enumerate() {
    let gather = gather.clone();
    future.register(Box::new(move |result| gather.store(index, result)));
  }

  output
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Exception;

  #[test]
  fn keeps_input_order() {
    let (mut first, pending_first) = Promise::pair();
    let (mut second, pending_second) = Promise::pair();

    let all = collect_all([pending_first, pending_second, Future::failed(Exception::msg("x"))]);
    second.set_value("b").unwrap();
    assert!(!all.is_ready());
    first.set_value("a").unwrap();

    let results = all.get().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(*results[0].as_ref().unwrap(), "a");
    assert_eq!(*results[1].as_ref().unwrap(), "b");
    assert!(results[2].is_err());
  }

  #[test]
  fn output_continuation_runs_unlocked() {
    let (promise, output) = Promise::pair();
    let gather = Arc::new(Gather {
      results: Mutex::new(vec![None]),
      remaining: AtomicUsize::new(1),
      promise: Mutex::new(Some(promise)),
    });

    let observed = gather.clone();
    let unlocked = output.then(move |_: Vec<Result<u8, Error>>| {
      observed.promise.try_lock().is_ok() && observed.results.try_lock().is_ok()
    });
    gather.store(0, Ok(1));

    assert!(unlocked.get().unwrap());
  }

  #[test]
  fn empty_input() {
    assert!(collect_all(Vec::<Future<u8>>::new()).get().unwrap().is_empty());
  }
}
