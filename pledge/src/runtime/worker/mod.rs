use std::{
  sync::{Arc, Weak},
  thread::{Builder, JoinHandle},
};

use tracing::trace;

use crate::{error::Error, runtime::SchedulerInner};

pub(crate) use shared::Shared;
use worker::Worker;

mod shared;
#[allow(clippy::module_inception)]
mod worker;

pub(crate) struct Workers(Vec<Worker>);

impl Workers {
  pub(crate) fn new(
    threads: usize,
    shared: &Arc<Shared>,
    handle: &Weak<SchedulerInner>,
  ) -> Self {
    let worker_vec = (0..threads)
      .map(|index| Worker::new(index, shared.clone(), handle.clone()))
      .collect();

    Workers(worker_vec)
  }

  /// Starts one named OS thread per worker.
  ///
  /// On failure the threads already started are handed back alongside the error so the
  /// caller can stop them.
  pub(crate) fn launch(
    self,
    thread_name: &str,
  ) -> Result<Vec<JoinHandle<()>>, (Error, Vec<JoinHandle<()>>)> {
    let mut join_handles = Vec::with_capacity(self.0.len());

    for (index, worker) in self.0.into_iter().enumerate() {
      let builder = Builder::new().name(format!("{thread_name}-{index}"));

      match builder.spawn(move || worker.launch()) {
        Ok(handle) => join_handles.push(handle),
        Err(err) => return Err((Error::Spawn(err), join_handles)),
      }
    }

    trace!(len = join_handles.len(), "launched worker threads");
    Ok(join_handles)
  }
}
