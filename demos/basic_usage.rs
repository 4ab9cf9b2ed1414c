use callback_queue::Queue;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example (limit 2) ---");

  let queue = Queue::<String, String>::create(Some(2)).expect("valid concurrency");

  for i in 0..5u64 {
    let delay_ms = 300 + (i % 3) * 200;
    queue
      .defer(move |done| {
        info!("Task {} starting, will call back in {}ms", i, delay_ms);
        tokio::spawn(async move {
          tokio::time::sleep(Duration::from_millis(delay_ms)).await;
          done.ok(format!("Task {} finished after {}ms", i, delay_ms));
        });
        None
      })
      .expect("defer before await");
  }

  info!(
    "All tasks registered. Active: {}, pending: {}",
    queue.active_count(),
    queue.pending_count()
  );

  match queue.join().expect("first notifier").await_result().await {
    Ok(results) => {
      for (index, result) in results.iter().enumerate() {
        info!("Result {}: {}", index, result);
      }
    }
    Err(e) => info!("Queue failed: {}", e),
  }

  info!("--- Basic Usage Example End ---");
}
