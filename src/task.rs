use crate::completion::Completion;
use crate::handle::AbortHandle;

/// The boxed start function of a registered task.
///
/// A task receives its completion gate and may hand back an [`AbortHandle`] that the
/// queue invokes if it aborts while the task is still outstanding.
pub type TaskFn<T, E> = Box<dyn FnOnce(Completion<T, E>) -> Option<AbortHandle> + Send + 'static>;

/// Internal record for one registered task, indexed by registration order.
pub(crate) enum TaskSlot<T, E> {
  /// Registered, not yet started.
  Pending(TaskFn<T, E>),
  /// Its start call is running.
  Starting,
  /// Started and awaiting its gate, with the abort handle the start call returned.
  Active(Option<AbortHandle>),
  /// Swept by an abort while its start call was still running. The handle that call
  /// returns is invoked as soon as it arrives.
  Swept,
  /// Completed, or swept by an abort. Any further gate calls for this index are ignored.
  Consumed,
}

impl<T, E> TaskSlot<T, E> {
  /// True while the task may still report through its gate.
  pub(crate) fn is_active(&self) -> bool {
    matches!(self, TaskSlot::Starting | TaskSlot::Active(_))
  }

  /// Takes the start function out of a pending slot and marks it starting.
  pub(crate) fn start(&mut self) -> Option<TaskFn<T, E>> {
    match std::mem::replace(self, TaskSlot::Starting) {
      TaskSlot::Pending(task) => Some(task),
      other => {
        *self = other;
        None
      }
    }
  }

  /// Records the abort handle returned by the start call.
  ///
  /// Gives the handle back if the slot no longer tracks the task: the first element is
  /// a handle that must be invoked because an abort swept the slot mid-start, the second
  /// a handle that is simply unused because the task already completed.
  pub(crate) fn finish_start(
    &mut self,
    handle: Option<AbortHandle>,
  ) -> (Option<AbortHandle>, Option<AbortHandle>) {
    match self {
      TaskSlot::Starting => {
        *self = TaskSlot::Active(handle);
        (None, None)
      }
      TaskSlot::Swept => {
        *self = TaskSlot::Consumed;
        (handle, None)
      }
      _ => (None, handle),
    }
  }

  /// Clears the slot for an abort, returning its previous contents.
  pub(crate) fn sweep(&mut self) -> TaskSlot<T, E> {
    let next = match self {
      TaskSlot::Starting => TaskSlot::Swept,
      _ => TaskSlot::Consumed,
    };
    std::mem::replace(self, next)
  }

  /// Clears the slot, returning the abort handle if the task was active and supplied one.
  pub(crate) fn consume(&mut self) -> Option<AbortHandle> {
    match std::mem::replace(self, TaskSlot::Consumed) {
      TaskSlot::Active(handle) => handle,
      _ => None,
    }
  }
}

impl<T, E> std::fmt::Debug for TaskSlot<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TaskSlot::Pending(_) => f.write_str("Pending"),
      TaskSlot::Starting => f.write_str("Starting"),
      TaskSlot::Active(handle) => f
        .debug_tuple("Active")
        .field(&handle.is_some())
        .finish(),
      TaskSlot::Swept => f.write_str("Swept"),
      TaskSlot::Consumed => f.write_str("Consumed"),
    }
  }
}
