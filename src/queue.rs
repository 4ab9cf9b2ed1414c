use crate::completion::Completion;
use crate::error::{panic_message, QueueError, TaskError};
use crate::handle::{AbortHandle, AwaitHandle};
use crate::notifier::{spread, Notifier, NotifyFn, QueueOutcome};
use crate::task::{TaskFn, TaskSlot};

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// How many tasks of a queue may be active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
  /// Every registered task starts immediately.
  #[default]
  Unbounded,
  /// At most this many tasks are active at any time.
  Max(NonZeroUsize),
}

impl Concurrency {
  /// Returns the numeric limit, or `None` when unbounded.
  pub fn limit(&self) -> Option<usize> {
    match self {
      Concurrency::Unbounded => None,
      Concurrency::Max(max) => Some(max.get()),
    }
  }

  fn admits(&self, active: usize) -> bool {
    match self {
      Concurrency::Unbounded => true,
      Concurrency::Max(max) => active < max.get(),
    }
  }
}

impl TryFrom<usize> for Concurrency {
  type Error = QueueError;

  fn try_from(value: usize) -> Result<Self, Self::Error> {
    NonZeroUsize::new(value)
      .map(Concurrency::Max)
      .ok_or(QueueError::InvalidConcurrency(value))
  }
}

impl fmt::Display for Concurrency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Concurrency::Unbounded => f.write_str("unbounded"),
      Concurrency::Max(max) => write!(f, "{}", max),
    }
  }
}

/// Scheduling state. Only touched under `Shared::state`, and the lock is never held
/// while tasks, abort hooks or the notifier run.
struct State<T, E> {
  tasks: Vec<TaskSlot<T, E>>,
  results: Vec<Option<T>>,
  pending: usize,
  active: usize,
  finished: usize,
  /// A dispatch pass is running somewhere up the stack (or on another thread).
  dispatching: bool,
  aborted: bool,
  error: Option<TaskError<E>>,
  notifier: Notifier<T, E>,
}

impl<T, E> State<T, E> {
  fn new() -> Self {
    Self {
      tasks: Vec::new(),
      results: Vec::new(),
      pending: 0,
      active: 0,
      finished: 0,
      dispatching: false,
      aborted: false,
      error: None,
      notifier: Notifier::Unset,
    }
  }

  fn can_dispatch(&self, concurrency: Concurrency) -> bool {
    !self.aborted && self.pending > 0 && concurrency.admits(self.active)
  }

  fn is_settled(&self) -> bool {
    self.aborted || (self.active == 0 && self.pending == 0)
  }
}

pub(crate) struct Shared<T, E> {
  pub(crate) id: u64,
  name: Arc<String>,
  concurrency: Concurrency,
  state: Mutex<State<T, E>>,
}

impl<T, E> Shared<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Starts pending tasks while capacity allows.
  ///
  /// If a pass is already running this only returns; the running pass re-checks its
  /// condition after every start call and picks up whatever capacity was freed.
  /// Returns the payload of a task panic that became the terminal error during this pass.
  fn dispatch(self: &Arc<Self>) -> Option<PanicPayload> {
    {
      let mut state = self.state.lock();
      if state.dispatching {
        return None;
      }
      state.dispatching = state.can_dispatch(self.concurrency);
    }

    loop {
      let (index, task) = {
        let mut state = self.state.lock();
        if !state.dispatching {
          return None;
        }
        let index = state.finished + state.active;
        let Some(task) = state.tasks.get_mut(index).and_then(TaskSlot::start) else {
          error!(queue_id = %self.id, queue_name = %*self.name, index, "Dispatch found no pending task at the expected index. Stopping pass.");
          state.dispatching = false;
          return None;
        };
        state.pending -= 1;
        state.active += 1;
        (index, task)
      };

      trace!(queue_id = %self.id, queue_name = %*self.name, index, "Starting task.");
      let gate = Completion::new(self.clone(), index);
      let started = panic::catch_unwind(AssertUnwindSafe(move || task(gate)));

      let mut state = self.state.lock();
      match started {
        Ok(abort_handle) => {
          let (late_hook, unused_handle) = match state.tasks.get_mut(index) {
            Some(slot) => slot.finish_start(abort_handle),
            None => (None, abort_handle),
          };
          state.dispatching = state.can_dispatch(self.concurrency);
          // Dropped outside the lock: captured values may call back into the queue from Drop.
          drop(state);
          drop(unused_handle);
          if let Some(hook) = late_hook {
            debug!(queue_id = %self.id, queue_name = %*self.name, index, "Queue aborted while task was starting. Invoking its abort hook.");
            self.run_abort_hook(hook);
          }
        }
        Err(payload) => {
          state.dispatching = false;
          if matches!(state.tasks.get(index), Some(TaskSlot::Starting)) {
            drop(state);
            let message = panic_message(&*payload);
            warn!(queue_id = %self.id, queue_name = %*self.name, index, "Task panicked while starting: {}", message);
            self.abort_with(TaskError::Panicked(message));
            return Some(payload);
          }
          if matches!(state.tasks.get(index), Some(TaskSlot::Swept)) {
            state.tasks[index] = TaskSlot::Consumed;
          }
          if state.aborted || state.notifier.has_fired() {
            // Nothing is left to report this panic to.
            drop(state);
            panic::resume_unwind(payload);
          }
          state.dispatching = state.can_dispatch(self.concurrency);
          drop(state);
          debug!(queue_id = %self.id, queue_name = %*self.name, index, "Task panicked after reporting completion. Ignoring panic.");
          drop(payload);
        }
      }
    }
  }

  pub(crate) fn complete(self: &Arc<Self>, index: usize, result: Result<T, TaskError<E>>) {
    let mut state = self.state.lock();
    let Some(slot) = state.tasks.get_mut(index).filter(|slot| slot.is_active()) else {
      debug!(queue_id = %self.id, queue_name = %*self.name, index, "Ignoring duplicate or late completion.");
      return;
    };
    let finished_handle = slot.consume();
    state.active -= 1;
    state.finished += 1;

    if state.aborted {
      return;
    }

    match result {
      Err(task_error) => {
        drop(state);
        drop(finished_handle);
        debug!(queue_id = %self.id, queue_name = %*self.name, index, "Task reported an error. Aborting queue.");
        self.abort_with(task_error);
      }
      Ok(value) => {
        if let Some(result_slot) = state.results.get_mut(index) {
          *result_slot = Some(value);
        }
        trace!(queue_id = %self.id, queue_name = %*self.name, index, active = state.active, pending = state.pending, "Task completed.");
        let more_pending = state.pending > 0;
        drop(state);
        drop(finished_handle);
        if more_pending {
          // A panic absorbed here is already the terminal error; the notifier reports it.
          let _ = self.dispatch();
        } else {
          self.finalize();
        }
      }
    }
  }

  /// Records the terminal error, sweeps every outstanding task and finalizes.
  pub(crate) fn abort_with(self: &Arc<Self>, terminal_error: TaskError<E>) {
    let (swept, discarded_results) = {
      let mut state = self.state.lock();
      if state.aborted {
        debug!(queue_id = %self.id, queue_name = %*self.name, "Queue already holds a terminal error. Ignoring abort.");
        return;
      }
      state.aborted = true;
      state.error = Some(terminal_error);
      state.pending = 0;
      state.active = 0;
      let swept: Vec<TaskSlot<T, E>> = state.tasks.iter_mut().rev().map(TaskSlot::sweep).collect();
      (swept, std::mem::take(&mut state.results))
    };
    // Dropped outside the lock: captured values may call back into the queue from Drop.
    drop(discarded_results);

    let hooks: Vec<AbortHandle> = swept.into_iter().filter_map(|mut slot| slot.consume()).collect();
    info!(queue_id = %self.id, queue_name = %*self.name, abort_hooks = hooks.len(), "Queue aborted.");

    for hook in hooks {
      self.run_abort_hook(hook);
    }

    self.finalize();
  }

  fn run_abort_hook(&self, hook: AbortHandle) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || hook.abort())) {
      warn!(queue_id = %self.id, queue_name = %*self.name, "Abort hook panicked. Ignoring: {}", panic_message(&*payload));
    }
  }

  /// Fires the notifier if one is registered and the queue has settled.
  fn finalize(&self) {
    let (callback, outcome) = {
      let mut state = self.state.lock();
      if !state.is_settled() {
        return;
      }
      let Some(callback) = state.notifier.take_for_firing() else {
        return;
      };
      let outcome: QueueOutcome<T, E> = match state.error.take() {
        Some(terminal_error) => Err(terminal_error),
        None => Ok(std::mem::take(&mut state.results).into_iter().flatten().collect()),
      };
      (callback, outcome)
    };

    debug!(queue_id = %self.id, queue_name = %*self.name, success = outcome.is_ok(), "Firing notifier.");
    callback(outcome);
  }
}

/// A concurrency-limited queue of callback-style tasks.
///
/// Tasks are registered with [`defer`](Queue::defer) and start in registration order as
/// soon as capacity allows. Each task gets a [`Completion`] gate to report its outcome.
/// A single notifier, registered with [`await_all`](Queue::await_all),
/// [`await_results`](Queue::await_results) or [`join`](Queue::join), fires exactly once
/// with every result in registration order, or with the first error.
///
/// `Queue` is a cheap handle; clones share the same scheduler.
pub struct Queue<T, E> {
  shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Queue<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T, E> fmt::Debug for Queue<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut debug = f.debug_struct("Queue");
    debug
      .field("id", &self.shared.id)
      .field("name", &*self.shared.name)
      .field("concurrency", &self.shared.concurrency);
    // Avoid blocking if a dispatch pass holds the lock.
    match self.shared.state.try_lock() {
      Some(state) => debug
        .field("pending", &state.pending)
        .field("active", &state.active)
        .field("finished", &state.finished)
        .field("aborted", &state.aborted)
        .field("notifier", &state.notifier)
        .finish(),
      None => debug.finish_non_exhaustive(),
    }
  }
}

impl<T, E> Queue<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  pub fn new(concurrency: Concurrency, name: &str) -> Self {
    let id = NEXT_QUEUE_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    trace!(queue_id = %id, queue_name = %name, %concurrency, "Queue created.");
    Self {
      shared: Arc::new(Shared {
        id,
        name: Arc::new(name.to_string()),
        concurrency,
        state: Mutex::new(State::new()),
      }),
    }
  }

  /// Creates a queue with an optional limit; `None` means unbounded.
  ///
  /// # Errors
  /// Returns `QueueError::InvalidConcurrency` for a limit of zero.
  pub fn create(limit: Option<usize>) -> Result<Self, QueueError> {
    let concurrency = match limit {
      Some(limit) => Concurrency::try_from(limit)?,
      None => Concurrency::Unbounded,
    };
    Ok(Self::new(concurrency, "queue"))
  }

  pub fn unbounded() -> Self {
    Self::new(Concurrency::Unbounded, "queue")
  }

  pub fn id(&self) -> u64 {
    self.shared.id
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn concurrency(&self) -> Concurrency {
    self.shared.concurrency
  }

  /// Tasks registered but not yet started.
  pub fn pending_count(&self) -> usize {
    self.shared.state.lock().pending
  }

  /// Tasks started whose gate has not fired yet.
  pub fn active_count(&self) -> usize {
    self.shared.state.lock().active
  }

  pub fn finished_count(&self) -> usize {
    self.shared.state.lock().finished
  }

  /// True once the queue holds a terminal error, from a task or from [`abort`](Queue::abort).
  pub fn is_aborted(&self) -> bool {
    self.shared.state.lock().aborted
  }

  /// Registers a task and starts it if capacity allows.
  ///
  /// The task receives its completion gate and may return an [`AbortHandle`]. If the queue
  /// already holds a terminal error the task is dropped without running.
  ///
  /// # Errors
  /// Returns `QueueError::DeferAfterAwait` once a notifier has been registered.
  ///
  /// # Panics
  /// If the task panics during this call's dispatch pass and no notifier is registered
  /// yet, the panic is resumed here after the queue has recorded it as its terminal error.
  pub fn defer<F>(&self, task: F) -> Result<&Self, QueueError>
  where
    F: FnOnce(Completion<T, E>) -> Option<AbortHandle> + Send + 'static,
  {
    self.register(Box::new(task))
  }

  /// Registers a task with bound arguments, passed after the gate when it starts.
  pub fn defer_with<A, F>(&self, task: F, args: A) -> Result<&Self, QueueError>
  where
    A: Send + 'static,
    F: FnOnce(Completion<T, E>, A) -> Option<AbortHandle> + Send + 'static,
  {
    self.defer(move |done| task(done, args))
  }

  /// Registers a future as a task. When dispatched it is spawned on `runtime`, and its
  /// output is reported through the gate. Aborting the queue cancels the spawned future.
  pub fn defer_future<Fut>(&self, runtime: &TokioHandle, future: Fut) -> Result<&Self, QueueError>
  where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let runtime = runtime.clone();
    let queue_id = self.shared.id;
    let queue_name = self.shared.name.clone();

    self.defer(move |done| {
      let token = CancellationToken::new();
      let task_token = token.clone();
      let index = done.index();

      runtime.spawn(
        async move {
          tokio::select! {
            biased;
            _ = task_token.cancelled() => {
              debug!("Queued future cancelled before completing.");
            }
            outcome = AssertUnwindSafe(future).catch_unwind() => {
              match outcome {
                Ok(result) => done.complete(result),
                Err(payload) => {
                  let message = panic_message(&*payload);
                  error!("Queued future panicked: {}", message);
                  done.panicked(message);
                }
              }
            }
          }
        }
        .instrument(info_span!("queued_future", queue_id = %queue_id, queue_name = %*queue_name, index)),
      );

      Some(AbortHandle::from(token))
    })
  }

  fn register(&self, task: TaskFn<T, E>) -> Result<&Self, QueueError> {
    {
      let mut state = self.shared.state.lock();
      if !state.notifier.is_unset() {
        warn!(queue_id = %self.shared.id, queue_name = %*self.shared.name, "Defer: Attempted to register a task after await.");
        return Err(QueueError::DeferAfterAwait);
      }
      if state.aborted {
        debug!(queue_id = %self.shared.id, queue_name = %*self.shared.name, "Defer: Queue holds a terminal error. Dropping task.");
        return Ok(self);
      }
      state.tasks.push(TaskSlot::Pending(task));
      state.results.push(None);
      state.pending += 1;
      trace!(queue_id = %self.shared.id, queue_name = %*self.shared.name, index = state.tasks.len() - 1, "Task registered.");
    }

    if let Some(payload) = self.shared.dispatch() {
      if self.shared.state.lock().notifier.is_unset() {
        panic::resume_unwind(payload);
      }
    }
    Ok(self)
  }

  /// Requests cancellation: outstanding tasks get their abort hooks invoked, pending
  /// tasks never start and the notifier receives `TaskError::Aborted`.
  /// Does nothing if the queue already holds a terminal error.
  pub fn abort(&self) -> &Self {
    self.shared.abort_with(TaskError::Aborted);
    self
  }

  /// Registers the notifier with the whole outcome: all results in registration order,
  /// or the terminal error.
  ///
  /// # Errors
  /// Returns `QueueError::MultipleAwait` if a notifier is already registered.
  pub fn await_all<F>(&self, callback: F) -> Result<&Self, QueueError>
  where
    F: FnOnce(QueueOutcome<T, E>) + Send + 'static,
  {
    self.register_notifier(Box::new(callback))
  }

  /// Registers the notifier in `(error, results)` form. On error the results are empty;
  /// on success they are positional, ready for slice patterns such as `[a, b, c]`.
  ///
  /// # Errors
  /// Returns `QueueError::MultipleAwait` if a notifier is already registered.
  pub fn await_results<F>(&self, callback: F) -> Result<&Self, QueueError>
  where
    F: FnOnce(Option<TaskError<E>>, Vec<T>) + Send + 'static,
  {
    self.register_notifier(spread(callback))
  }

  /// Registers the notifier and returns a handle to await the outcome asynchronously.
  ///
  /// # Errors
  /// Returns `QueueError::MultipleAwait` if a notifier is already registered.
  pub fn join(&self) -> Result<AwaitHandle<T, E>, QueueError> {
    let (result_tx, result_rx) = oneshot::channel();
    let queue_id = self.shared.id;
    self.await_all(move |outcome| {
      if result_tx.send(outcome).is_err() {
        debug!(queue_id = %queue_id, "Await handle dropped before the queue finished.");
      }
    })?;
    Ok(AwaitHandle {
      queue_id,
      result_receiver: Some(result_rx),
    })
  }

  fn register_notifier(&self, callback: NotifyFn<T, E>) -> Result<&Self, QueueError> {
    {
      let mut state = self.shared.state.lock();
      if !state.notifier.is_unset() {
        return Err(QueueError::MultipleAwait);
      }
      state.notifier = Notifier::Registered(callback);
    }
    // Tasks may all have finished already.
    self.shared.finalize();
    Ok(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn concurrency_from_usize_rejects_zero() {
    assert_eq!(Concurrency::try_from(0), Err(QueueError::InvalidConcurrency(0)));
    assert_eq!(Concurrency::try_from(3).map(|c| c.limit()), Ok(Some(3)));
    assert_eq!(Concurrency::Unbounded.limit(), None);
    assert_eq!(Concurrency::default(), Concurrency::Unbounded);
  }

  #[test]
  fn concurrency_admits_below_limit_only() {
    let two = Concurrency::try_from(2).unwrap();
    assert!(two.admits(0));
    assert!(two.admits(1));
    assert!(!two.admits(2));
    assert!(Concurrency::Unbounded.admits(usize::MAX - 1));
  }

  #[test]
  fn create_validates_limit() {
    assert!(matches!(Queue::<(), ()>::create(Some(0)), Err(QueueError::InvalidConcurrency(0))));
    let queue = Queue::<(), ()>::create(None).unwrap();
    assert_eq!(queue.concurrency(), Concurrency::Unbounded);
    let queue = Queue::<(), ()>::create(Some(4)).unwrap();
    assert_eq!(queue.concurrency().limit(), Some(4));
  }

  #[test]
  fn state_dispatch_stops_when_aborted() {
    let mut state = State::<(), ()>::new();
    state.pending = 2;
    assert!(state.can_dispatch(Concurrency::Unbounded));
    state.aborted = true;
    assert!(!state.can_dispatch(Concurrency::Unbounded));
    assert!(state.is_settled());
  }

  #[test]
  fn queue_ids_are_unique() {
    let first = Queue::<(), ()>::unbounded();
    let second = Queue::<(), ()>::unbounded();
    assert_ne!(first.id(), second.id());
    assert_eq!(first.clone().id(), first.id());
  }
}
