use crate::error::TaskError;
use crate::queue::Shared;

use std::fmt;
use std::sync::Arc;

/// The completion gate handed to a task when it starts.
///
/// A task reports its outcome by calling [`complete`](Completion::complete) (or
/// [`ok`](Completion::ok) / [`fail`](Completion::fail)). The gate may be cloned, moved to
/// another thread, called late, called several times or never called at all. Only the
/// first call for a task counts; later calls and calls arriving after the queue has
/// aborted are ignored.
pub struct Completion<T, E> {
  shared: Arc<Shared<T, E>>,
  index: usize,
}

impl<T, E> Completion<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  pub(crate) fn new(shared: Arc<Shared<T, E>>, index: usize) -> Self {
    Self { shared, index }
  }

  /// Registration index of the task this gate belongs to.
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn complete(&self, result: Result<T, E>) {
    self.shared.complete(self.index, result.map_err(TaskError::Failed));
  }

  pub fn ok(&self, value: T) {
    self.complete(Ok(value));
  }

  pub fn fail(&self, error: E) {
    self.complete(Err(error));
  }

  pub(crate) fn panicked(&self, message: String) {
    self.shared.complete(self.index, Err(TaskError::Panicked(message)));
  }
}

impl<T, E> Clone for Completion<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      index: self.index,
    }
  }
}

impl<T, E> fmt::Debug for Completion<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completion")
      .field("queue_id", &self.shared.id)
      .field("index", &self.index)
      .finish()
  }
}
