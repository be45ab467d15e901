#![allow(unused_imports)]

pub(crate) mod sync {
  #[cfg(loom)]
  pub use loom::sync::{Arc, Mutex, MutexGuard};
  #[cfg(not(loom))]
  pub use std::sync::{Arc, Mutex, MutexGuard};

  pub mod atomic {
    #[cfg(loom)]
    pub use loom::sync::atomic::{AtomicUsize, Ordering};
    #[cfg(not(loom))]
    pub use std::sync::atomic::{AtomicUsize, Ordering};
  }

  /// Locks `mutex`, recovering the guard if a previous holder panicked.
  ///
  /// No user code runs while a crate lock is held, so a poisoned lock only means the
  /// panic happened in an unrelated frame of the same thread.
  pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
  }
}
