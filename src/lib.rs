//! A concurrency-limited runner for callback-style tasks.
//!
//! Tasks start in registration order while capacity allows, report through a
//! single-use completion gate, and a single notifier fires once with every result in
//! registration order, or with the first error. Tasks may complete synchronously inside
//! their start call without growing the stack, and the first failure aborts the queue.

mod completion;
mod error;
mod handle;
mod notifier;
mod queue;
mod task;

pub use completion::Completion;
pub use error::{QueueError, TaskError};
pub use handle::{AbortHandle, AwaitHandle};
pub use notifier::QueueOutcome;
pub use queue::{Concurrency, Queue};
pub use task::TaskFn;
