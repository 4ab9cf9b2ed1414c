use callback_queue::{AbortHandle, Queue};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Abort On Error Example ---");

  let queue = Queue::<u64, String>::unbounded();

  for i in 0..4u64 {
    queue
      .defer(move |done| {
        let token = CancellationToken::new();
        let task_token = token.clone();
        tokio::spawn(async move {
          tokio::select! {
            _ = task_token.cancelled() => info!("Task {} observed cancellation", i),
            _ = tokio::time::sleep(Duration::from_secs(2 + i)) => done.ok(i),
          }
        });
        Some(AbortHandle::from(token))
      })
      .expect("defer before await");
  }

  queue
    .defer(|done| {
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        done.fail("disk full".to_string());
      });
      None
    })
    .expect("defer before await");

  queue
    .await_results(|error, results| match error {
      Some(e) => info!("Queue stopped: {} ({} results kept)", e, results.len()),
      None => info!("All {} tasks finished", results.len()),
    })
    .expect("first notifier");

  // Give the cancelled tasks a moment to log.
  tokio::time::sleep(Duration::from_millis(400)).await;
  info!("--- Abort On Error Example End ---");
}
