use thiserror::Error;

/// Misuse of the queue API. Returned synchronously from the call that caused it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
  #[error("invalid concurrency: {0} (must be at least 1)")]
  InvalidConcurrency(usize),

  #[error("can not defer after await")]
  DeferAfterAwait,

  #[error("multiple await not allowed")]
  MultipleAwait,
}

/// The terminal error of a queue, delivered to its notifier.
///
/// Only the first error observed by a queue is kept; everything after it is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
  #[error("task failed: {0}")]
  Failed(E),

  #[error("task panicked: {0}")]
  Panicked(String),

  #[error("abort")]
  Aborted,

  /// The notifier was dropped without firing, e.g. every gate of an unfinished task went away.
  #[error("queue was dropped before all tasks finished")]
  Abandoned,
}

impl<E> TaskError<E> {
  pub fn is_aborted(&self) -> bool {
    matches!(self, TaskError::Aborted)
  }

  /// Returns the task's own error value, if this is a `Failed` error.
  pub fn into_failed(self) -> Option<E> {
    match self {
      TaskError::Failed(e) => Some(e),
      _ => None,
    }
  }
}

/// Extracts a readable message from a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "Box<dyn Any>".to_string()
  }
}
