use std::{any::Any, error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// Every failure a promise, future, coroutine or scheduler can report.
///
/// The first five variants are misuse or lifecycle errors raised by the crate itself.
/// [`Error::Propagated`] and [`Error::Panicked`] are payload errors: they travel through
/// a `then` chain like ordinary values until something observes them.
#[derive(Error, Debug)]
pub enum Error {
  #[error("promise already satisfied")]
  PromiseAlreadySatisfied,
  #[error("future already retrieved")]
  FutureAlreadyRetrieved,
  #[error("broken promise: producer dropped before publishing a result")]
  BrokenPromise,
  #[error("scheduler stopped")]
  SchedulerStopped,
  #[error("blocking wait on a scheduler worker thread")]
  SelfBlockingWait,

  #[error("panicked: {0}")]
  Panicked(String),
  #[error("failed to spawn worker thread")]
  Spawn(#[source] std::io::Error),
  #[error(transparent)]
  Propagated(#[from] Exception),
}

impl Error {
  /// Returns the propagated exception, if this is a payload error set by a producer.
  pub fn exception(&self) -> Option<&Exception> {
    match self {
      Error::Propagated(exception) => Some(exception),
      _ => None,
    }
  }

  pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
    Error::Panicked(panic_message(payload.as_ref()))
  }
}

/// A producer-supplied error, shared so it can be surfaced wherever the chain ends.
#[derive(Clone)]
pub struct Exception(Arc<dyn StdError + Send + Sync>);

impl Exception {
  pub fn new<E>(error: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Exception(Arc::new(error))
  }

  /// An exception carrying only a message.
  pub fn msg(message: impl Into<String>) -> Self {
    Exception::new(Message(message.into()))
  }

  pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
    self.0.downcast_ref::<E>()
  }
}

impl fmt::Debug for Exception {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}

impl fmt::Display for Exception {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.0, f)
  }
}

impl StdError for Exception {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

#[derive(Error, Debug)]
#[error("{0}")]
struct Message(String);

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_owned()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "<non-string panic payload>".to_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exception_downcast() {
    let error: Error =
      Exception::new(std::io::Error::other("disk on fire")).into();

    let exception = error.exception().unwrap();
    assert!(exception.downcast_ref::<std::io::Error>().is_some());
    assert_eq!(error.to_string(), "disk on fire");
  }

  #[test]
  fn panic_payloads() {
    assert_eq!(panic_message(&"static"), "static");
    assert_eq!(panic_message(&String::from("owned")), "owned");
    assert_eq!(panic_message(&7u8), "<non-string panic payload>");
  }
}
