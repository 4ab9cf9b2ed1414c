#![allow(dead_code)]

use callback_queue::{AbortHandle, Completion, Queue, QueueOutcome};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// Helper to initialize tracing for tests
pub fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,callback_queue=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// What a probing task reports: how many of its kind were active when it completed,
/// and the order in which it was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
  pub active: usize,
  pub index: usize,
}

pub fn probes(actives: &[usize]) -> Vec<Probe> {
  actives
    .iter()
    .enumerate()
    .map(|(index, &active)| Probe { active, index })
    .collect()
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A deterministic "next tick" loop: jobs run in FIFO order when `run` is called.
#[derive(Clone, Default)]
pub struct Ticker {
  jobs: Arc<Mutex<VecDeque<Job>>>,
}

impl Ticker {
  pub fn next_tick(&self, job: impl FnOnce() + Send + 'static) {
    self.jobs.lock().unwrap().push_back(Box::new(job));
  }

  /// Runs queued jobs, including ones queued while running, until none remain.
  pub fn run(&self) -> usize {
    let mut ran = 0;
    loop {
      let job = self.jobs.lock().unwrap().pop_front();
      match job {
        Some(job) => {
          job();
          ran += 1;
        }
        None => return ran,
      }
    }
  }
}

/// Shared slot the notifier writes into, plus a count of how often it fired.
#[derive(Clone)]
pub struct Captured<T, E> {
  outcome: Arc<Mutex<Option<QueueOutcome<T, E>>>>,
  calls: Arc<AtomicUsize>,
}

impl<T: Send + 'static, E: Send + 'static> Captured<T, E> {
  pub fn new() -> Self {
    Self {
      outcome: Arc::new(Mutex::new(None)),
      calls: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn callback(&self) -> impl FnOnce(QueueOutcome<T, E>) + Send + 'static {
    let outcome = self.outcome.clone();
    let calls = self.calls.clone();
    move |result| {
      calls.fetch_add(1, Ordering::SeqCst);
      *outcome.lock().unwrap() = Some(result);
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn take(&self) -> Option<QueueOutcome<T, E>> {
    self.outcome.lock().unwrap().take()
  }
}

/// Tasks that hand their gate to the test instead of completing.
#[derive(Clone)]
pub struct Gates<T, E> {
  gates: Arc<Mutex<Vec<Completion<T, E>>>>,
}

impl<T: Send + 'static, E: Send + 'static> Gates<T, E> {
  pub fn new() -> Self {
    Self {
      gates: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn task(&self) -> impl FnOnce(Completion<T, E>) -> Option<AbortHandle> + Send + 'static {
    let gates = self.gates.clone();
    move |done| {
      gates.lock().unwrap().push(done);
      None
    }
  }

  pub fn len(&self) -> usize {
    self.gates.lock().unwrap().len()
  }

  /// Gate of the `nth` started task.
  pub fn get(&self, nth: usize) -> Completion<T, E> {
    self.gates.lock().unwrap()[nth].clone()
  }
}

pub fn push_multiple_tasks<T, E, F, M>(queue: &Queue<T, E>, count: usize, mut make_task: M) -> &Queue<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
  F: FnOnce(Completion<T, E>) -> Option<AbortHandle> + Send + 'static,
  M: FnMut() -> F,
{
  for _ in 0..count {
    queue.defer(make_task()).unwrap();
  }
  queue
}
