use crate::error::TaskError;

use std::fmt;

/// Final outcome of a queue: results in registration order, or the terminal error.
pub type QueueOutcome<T, E> = Result<Vec<T>, TaskError<E>>;

pub(crate) type NotifyFn<T, E> = Box<dyn FnOnce(QueueOutcome<T, E>) + Send + 'static>;

/// The single completion callback of a queue.
pub(crate) enum Notifier<T, E> {
  Unset,
  Registered(NotifyFn<T, E>),
  Fired,
}

impl<T, E> Notifier<T, E> {
  pub(crate) fn is_unset(&self) -> bool {
    matches!(self, Notifier::Unset)
  }

  pub(crate) fn has_fired(&self) -> bool {
    matches!(self, Notifier::Fired)
  }

  /// Takes the callback if one is registered, leaving the notifier in the fired state.
  pub(crate) fn take_for_firing(&mut self) -> Option<NotifyFn<T, E>> {
    match std::mem::replace(self, Notifier::Fired) {
      Notifier::Registered(callback) => Some(callback),
      other => {
        *self = other;
        None
      }
    }
  }
}

impl<T, E> fmt::Debug for Notifier<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Notifier::Unset => "Unset",
      Notifier::Registered(_) => "Registered",
      Notifier::Fired => "Fired",
    })
  }
}

/// Adapts an `(error, results)` style callback to the notifier shape.
pub(crate) fn spread<T, E, F>(callback: F) -> NotifyFn<T, E>
where
  T: 'static,
  E: 'static,
  F: FnOnce(Option<TaskError<E>>, Vec<T>) + Send + 'static,
{
  Box::new(move |outcome| match outcome {
    Ok(results) => callback(None, results),
    Err(error) => callback(Some(error), Vec::new()),
  })
}
