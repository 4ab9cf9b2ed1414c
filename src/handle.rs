use crate::error::TaskError;

use std::fmt;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing;

/// A cancellation hook returned by a task from its start call.
///
/// The queue invokes it at most once, and only if the queue aborts while the task is
/// still outstanding. Panics raised by the hook are caught and discarded.
pub struct AbortHandle {
  hook: Box<dyn FnOnce() + Send + 'static>,
}

impl AbortHandle {
  pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
    Self { hook: Box::new(hook) }
  }

  pub(crate) fn abort(self) {
    (self.hook)()
  }
}

impl fmt::Debug for AbortHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AbortHandle").finish_non_exhaustive()
  }
}

impl From<CancellationToken> for AbortHandle {
  fn from(token: CancellationToken) -> Self {
    AbortHandle::new(move || token.cancel())
  }
}

impl From<tokio::task::AbortHandle> for AbortHandle {
  fn from(handle: tokio::task::AbortHandle) -> Self {
    AbortHandle::new(move || handle.abort())
  }
}

/// Awaitable side of a queue's notifier, returned by [`Queue::join`](crate::Queue::join).
#[derive(Debug)]
pub struct AwaitHandle<T, E> {
  pub(crate) queue_id: u64,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<Vec<T>, TaskError<E>>>>,
}

impl<T, E> AwaitHandle<T, E> {
  /// Returns the id of the queue this handle waits on.
  pub fn queue_id(&self) -> u64 {
    self.queue_id
  }

  /// Waits until the queue finishes and returns its results in registration order,
  /// or its terminal error.
  ///
  /// # Errors
  /// Returns the queue's terminal error if a task failed, panicked or the queue was aborted.
  /// Returns `TaskError::Abandoned` if the notifier was dropped without firing.
  pub async fn await_result(mut self) -> Result<Vec<T>, TaskError<E>> {
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(outcome) => outcome,
        Err(recv_error) => {
          tracing::warn!(queue_id = %self.queue_id, "Notifier dropped without firing: {}", recv_error);
          Err(TaskError::Abandoned)
        }
      },
      None => Err(TaskError::Abandoned),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn abort_handle_runs_hook_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handle = AbortHandle::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    handle.abort();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn abort_handle_from_token_cancels() {
    let token = CancellationToken::new();
    let handle = AbortHandle::from(token.clone());
    assert!(!token.is_cancelled());
    handle.abort();
    assert!(token.is_cancelled());
  }
}
